//! Backup/restore integration tests: archive round-trips, diff planning,
//! and the remaining-file policy.

mod common;

use common::{connect_emu, emu_board};
use mpboard_core::{RemainingDisposition, RemainingPolicy};
use tempfile::tempdir;

#[test]
fn test_backup_then_restore_reproduces_tree() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("backup.tar.gz");

    // Back up a known tree.
    let source = emu_board();
    source.put_file("/a.py", b"print('a')".to_vec());
    source.put_file("/dir/b.py", b"print('b')".to_vec());
    {
        let board = connect_emu(&source);
        let summary = board.handle().backup(&archive).unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.created.len(), 2);
        assert_eq!(
            summary.bytes_transferred,
            (b"print('a')".len() + b"print('b')".len()) as u64
        );
    }

    // Restore it onto an empty device.
    let target = emu_board();
    {
        let board = connect_emu(&target);
        let summary = board
            .handle()
            .restore(&archive, RemainingPolicy::Keep)
            .unwrap();
        assert!(summary.is_clean());
        let mut created = summary.created.clone();
        created.sort();
        assert_eq!(created, vec!["/a.py".to_string(), "/dir/b.py".to_string()]);
    }

    assert_eq!(target.file("/a.py").unwrap(), b"print('a')");
    assert_eq!(target.file("/dir/b.py").unwrap(), b"print('b')");
}

#[test]
fn test_restore_keep_policy_leaves_remaining_file() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("backup.tar.gz");

    let source = emu_board();
    source.put_file("/a.py", b"aa".to_vec());
    {
        let board = connect_emu(&source);
        board.handle().backup(&archive).unwrap();
    }

    let target = emu_board();
    target.put_file("/extra.py", b"keep me".to_vec());
    {
        let board = connect_emu(&target);
        let summary = board
            .handle()
            .restore(&archive, RemainingPolicy::Keep)
            .unwrap();
        assert_eq!(summary.remaining.len(), 1);
        assert_eq!(summary.remaining[0].path, "/extra.py");
        assert_eq!(summary.remaining[0].disposition, RemainingDisposition::Kept);
    }
    assert_eq!(target.file("/extra.py").unwrap(), b"keep me");
}

#[test]
fn test_restore_delete_policy_removes_remaining_file() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("backup.tar.gz");

    let source = emu_board();
    source.put_file("/a.py", b"aa".to_vec());
    {
        let board = connect_emu(&source);
        board.handle().backup(&archive).unwrap();
    }

    let target = emu_board();
    target.put_file("/extra.py", b"drop me".to_vec());
    target.put_file("/stale/c.py", b"drop dir".to_vec());
    {
        let board = connect_emu(&target);
        let summary = board
            .handle()
            .restore(&archive, RemainingPolicy::Delete)
            .unwrap();
        let mut deleted: Vec<&str> = summary
            .remaining
            .iter()
            .filter(|r| r.disposition == RemainingDisposition::Deleted)
            .map(|r| r.path.as_str())
            .collect();
        deleted.sort();
        assert_eq!(deleted, vec!["/extra.py", "/stale/c.py"]);
    }
    assert!(!target.exists("/extra.py"));
    assert!(!target.exists("/stale/c.py"));
    // The emptied remote-only directory goes too.
    assert!(!target.exists("/stale"));
    assert_eq!(target.file("/a.py").unwrap(), b"aa");
}

#[test]
fn test_restore_skips_unchanged_and_overwrites_differing() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("backup.tar.gz");

    let source = emu_board();
    source.put_file("/same.py", b"identical".to_vec());
    source.put_file("/size.py", b"short".to_vec());
    source.put_file("/hash.py", b"AAAA".to_vec());
    {
        let board = connect_emu(&source);
        board.handle().backup(&archive).unwrap();
    }

    let target = emu_board();
    target.put_file("/same.py", b"identical".to_vec());
    target.put_file("/size.py", b"much longer content".to_vec());
    // Same length as the archived content, different bytes: only the hash
    // comparison can tell these apart.
    target.put_file("/hash.py", b"BBBB".to_vec());
    {
        let board = connect_emu(&target);
        let summary = board
            .handle()
            .restore(&archive, RemainingPolicy::Keep)
            .unwrap();
        assert_eq!(summary.unchanged, vec!["/same.py".to_string()]);
        let mut overwritten = summary.overwritten.clone();
        overwritten.sort();
        assert_eq!(
            overwritten,
            vec!["/hash.py".to_string(), "/size.py".to_string()]
        );
        assert!(summary.created.is_empty());
    }
    assert_eq!(target.file("/size.py").unwrap(), b"short");
    assert_eq!(target.file("/hash.py").unwrap(), b"AAAA");
}

#[test]
fn test_backup_of_empty_device_produces_empty_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("empty.tar.gz");

    let source = emu_board();
    {
        let board = connect_emu(&source);
        let summary = board.handle().backup(&archive).unwrap();
        assert!(summary.is_clean());
        assert!(summary.created.is_empty());
    }

    // Restoring the empty archive onto an empty device is a no-op.
    let target = emu_board();
    {
        let board = connect_emu(&target);
        let summary = board
            .handle()
            .restore(&archive, RemainingPolicy::Keep)
            .unwrap();
        assert!(summary.is_clean());
        assert!(summary.created.is_empty());
        assert!(summary.remaining.is_empty());
    }
}
