//! File transfer integration tests: chunked read/write round-trips at the
//! chunk-size boundaries, listing, stat, and the filesystem error mapping.

mod common;

use common::{connect_emu, emu_board};
use mpboard_core::{BoardError, BoardEvent, EntryKind, FileSystemErrorKind};

/// Deterministic non-trivial content of a given size.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7) & 0xFF) as u8).collect()
}

#[test]
fn test_write_read_roundtrip_at_chunk_boundaries() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    // Chunk size is 256; cover the boundary cases and a multi-megabyte
    // body in one session.
    for (i, size) in [0usize, 1, 255, 256, 257, 2 * 1024 * 1024 + 3]
        .into_iter()
        .enumerate()
    {
        let path = format!("/rt_{}.bin", i);
        let data = pattern(size);
        handle.write_file(&path, data.clone()).unwrap();
        let read_back = handle.read_file(&path).unwrap();
        assert_eq!(read_back.len(), size, "size mismatch for {}", path);
        assert_eq!(read_back, data, "content mismatch for {}", path);
    }
}

#[test]
fn test_list_dir_reports_nested_tree() {
    let emu = emu_board();
    emu.put_file("/main.py", b"print('hi')".to_vec());
    emu.put_file("/lib/util.py", b"x = 1".to_vec());
    let board = connect_emu(&emu);

    let mut entries = board.handle().list_dir("/").unwrap();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<(&str, EntryKind)> = entries
        .iter()
        .map(|e| (e.path.as_str(), e.kind))
        .collect();
    assert_eq!(
        paths,
        vec![
            ("/lib", EntryKind::Directory),
            ("/lib/util.py", EntryKind::File),
            ("/main.py", EntryKind::File),
        ]
    );
    let util = entries.iter().find(|e| e.path == "/lib/util.py").unwrap();
    assert_eq!(util.size, 5);
}

#[test]
fn test_stat_file_and_directory() {
    let emu = emu_board();
    emu.put_file("/lib/util.py", b"x = 1".to_vec());
    let board = connect_emu(&emu);
    let handle = board.handle();

    let entry = handle.stat("/lib/util.py").unwrap();
    assert_eq!(entry.kind, EntryKind::File);
    assert_eq!(entry.size, 5);

    let entry = handle.stat("/lib").unwrap();
    assert_eq!(entry.kind, EntryKind::Directory);
}

#[test]
fn test_filesystem_error_mapping() {
    let emu = emu_board();
    emu.put_file("/lib/util.py", b"x = 1".to_vec());
    let board = connect_emu(&emu);
    let handle = board.handle();

    // Not found.
    match handle.read_file("/missing.py").unwrap_err() {
        BoardError::FileSystem { kind, path } => {
            assert_eq!(kind, FileSystemErrorKind::NotFound);
            assert_eq!(path, "/missing.py");
        }
        other => panic!("expected FileSystem error, got {:?}", other),
    }

    // Already exists.
    match handle.mkdir("/lib").unwrap_err() {
        BoardError::FileSystem { kind, .. } => {
            assert_eq!(kind, FileSystemErrorKind::AlreadyExists)
        }
        other => panic!("expected FileSystem error, got {:?}", other),
    }

    // Not empty.
    match handle.rmdir("/lib").unwrap_err() {
        BoardError::FileSystem { kind, .. } => assert_eq!(kind, FileSystemErrorKind::NotEmpty),
        other => panic!("expected FileSystem error, got {:?}", other),
    }

    // Invalid name is rejected host-side, before any snippet runs.
    match handle.delete("/bad\nname").unwrap_err() {
        BoardError::FileSystem { kind, .. } => {
            assert_eq!(kind, FileSystemErrorKind::InvalidName)
        }
        other => panic!("expected FileSystem error, got {:?}", other),
    }
}

#[test]
fn test_mkdir_write_delete_rmdir_cycle() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    handle.mkdir("/data").unwrap();
    handle.write_file("/data/log.txt", b"entry".to_vec()).unwrap();
    assert_eq!(emu.file("/data/log.txt").unwrap(), b"entry");

    handle.delete("/data/log.txt").unwrap();
    assert!(!emu.exists("/data/log.txt"));
    handle.rmdir("/data").unwrap();
    assert!(!emu.exists("/data"));
}

#[test]
fn test_rename_moves_content() {
    let emu = emu_board();
    emu.put_file("/old.py", b"x = 1".to_vec());
    let board = connect_emu(&emu);

    board.handle().rename("/old.py", "/new.py").unwrap();
    assert!(!emu.exists("/old.py"));
    assert_eq!(emu.file("/new.py").unwrap(), b"x = 1");
}

#[test]
fn test_version_query() {
    let emu = emu_board();
    let board = connect_emu(&emu);

    let version = board.handle().version().unwrap();
    assert_eq!(version.sysname, "emu");
    assert!(!version.release.is_empty());
}

#[test]
fn test_progress_events_during_transfer() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    handle.write_file("/big.bin", pattern(1000)).unwrap();

    let mut saw_progress = false;
    let mut last = (0, 0);
    while let Ok(event) = board.events().try_recv() {
        if let BoardEvent::Progress { path, done, total } = event {
            assert_eq!(path, "/big.bin");
            saw_progress = true;
            last = (done, total);
        }
    }
    assert!(saw_progress, "no progress events published");
    assert_eq!(last, (1000, 1000));
}

#[test]
fn test_write_into_missing_directory_fails() {
    let emu = emu_board();
    let board = connect_emu(&emu);

    let err = board
        .handle()
        .write_file("/nope/file.bin", b"data".to_vec())
        .unwrap_err();
    assert!(matches!(
        err,
        BoardError::FileSystem {
            kind: FileSystemErrorKind::NotFound,
            ..
        }
    ));
}
