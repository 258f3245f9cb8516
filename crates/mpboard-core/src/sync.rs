//! Backup and restore.
//!
//! A backup is a plain `.tar.gz` whose entry paths mirror the device tree's
//! relative paths; there is no manifest. Restore re-derives the diff by
//! comparing archive entries against a live listing (size, then SHA-256),
//! so the archive alone is the durable backup state.
//!
//! Per-file failures are recorded into the run's summary and skipped; only
//! a connection-level failure (or an interrupt) aborts the run.

use crate::error::{BoardError, FileSystemErrorKind};
use crate::request::{
    RemainingDisposition, RemainingFile, RemainingPolicy, SyncFailure, SyncSummary,
};
use crate::transfer::DeviceFs;
use crate::transport::Transport;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Abort on connection-level failures and interrupts; anything else is a
/// per-file failure the caller records.
fn is_abort(err: &BoardError) -> bool {
    err.is_connection_error() || matches!(err, BoardError::Interrupted)
}

fn archive_err(err: impl std::fmt::Display) -> BoardError {
    BoardError::Archive(err.to_string())
}

// ============================================================================
// Backup
// ============================================================================

/// Back up the whole remote tree into `archive`.
pub(crate) fn backup<T: Transport>(
    fs: &mut DeviceFs<'_, T>,
    archive: &Path,
) -> Result<SyncSummary, BoardError> {
    let entries = fs.list_dir("/")?;

    let file = File::create(archive).map_err(archive_err)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut summary = SyncSummary::default();
    for entry in &entries {
        if fs.cancel().is_cancelled() {
            return Err(BoardError::Interrupted);
        }
        let rel = entry.path.trim_start_matches('/').to_string();
        if !entry.is_file() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/", rel), std::io::empty())
                .map_err(archive_err)?;
            continue;
        }

        fs.events().status(format!("Reading {}", entry.path));
        match fs.read_file(&entry.path) {
            Ok(data) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, &rel, data.as_slice())
                    .map_err(archive_err)?;
                summary.bytes_transferred += data.len() as u64;
                summary.created.push(entry.path.clone());
            }
            Err(e) if is_abort(&e) => return Err(e),
            Err(e) => {
                debug!("backup of {} failed: {}", entry.path, e);
                summary.failures.push(SyncFailure {
                    path: entry.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let encoder = builder.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)?;
    info!(
        "backup complete: {} files, {} bytes, {} failures",
        summary.created.len(),
        summary.bytes_transferred,
        summary.failures.len()
    );
    Ok(summary)
}

// ============================================================================
// Restore
// ============================================================================

/// Everything read out of a backup archive.
struct ArchiveContents {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// Read the archive fully into memory. Entry paths are normalized to
/// absolute device paths.
fn read_archive(archive: &Path) -> Result<ArchiveContents, BoardError> {
    let file = File::open(archive).map_err(archive_err)?;
    let decoder = GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);

    let mut files = BTreeMap::new();
    let mut dirs = BTreeSet::new();
    for entry in tar.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?;
        let rel = path.to_string_lossy().into_owned();
        let rel = rel.trim_start_matches("./").trim_end_matches('/');
        if rel.is_empty() {
            continue;
        }
        let abs = format!("/{}", rel);
        if entry.header().entry_type().is_dir() {
            dirs.insert(abs);
        } else {
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data).map_err(archive_err)?;
            // Record implied parent directories too.
            let mut parent = abs.rsplit_once('/').map(|(p, _)| p.to_string());
            while let Some(p) = parent.filter(|p| !p.is_empty()) {
                parent = p.rsplit_once('/').map(|(q, _)| q.to_string());
                dirs.insert(p);
            }
            files.insert(abs, data);
        }
    }
    Ok(ArchiveContents { files, dirs })
}

/// The derived create/overwrite/remaining sets for one restore run.
struct SyncPlan {
    create: Vec<String>,
    overwrite: Vec<String>,
    unchanged: Vec<String>,
    remaining: Vec<String>,
}

/// Diff archive contents against the live device tree.
fn plan_restore<T: Transport>(
    fs: &mut DeviceFs<'_, T>,
    contents: &ArchiveContents,
) -> Result<(SyncPlan, BTreeSet<String>), BoardError> {
    let remote = fs.list_dir("/")?;
    let mut remote_files = BTreeMap::new();
    let mut remote_dirs = BTreeSet::new();
    for entry in remote {
        if entry.is_file() {
            remote_files.insert(entry.path, entry.size);
        } else {
            remote_dirs.insert(entry.path);
        }
    }

    let mut plan = SyncPlan {
        create: Vec::new(),
        overwrite: Vec::new(),
        unchanged: Vec::new(),
        remaining: Vec::new(),
    };

    for (path, data) in &contents.files {
        match remote_files.get(path) {
            None => plan.create.push(path.clone()),
            Some(&size) if size != data.len() as u64 => plan.overwrite.push(path.clone()),
            Some(_) => {
                // Same size: compare content hashes.
                let local = hex::encode(Sha256::digest(data));
                match fs.sha256(path) {
                    Ok(remote_hash) if remote_hash == local => plan.unchanged.push(path.clone()),
                    Ok(_) => plan.overwrite.push(path.clone()),
                    Err(e) if is_abort(&e) => return Err(e),
                    Err(e) => {
                        // Hashing is best-effort (older firmware may lack
                        // uhashlib); treat the file as differing.
                        debug!("remote hash of {} unavailable: {}", path, e);
                        plan.overwrite.push(path.clone());
                    }
                }
            }
        }
    }

    plan.remaining = remote_files
        .keys()
        .filter(|path| !contents.files.contains_key(*path))
        .cloned()
        .collect();

    Ok((plan, remote_dirs))
}

/// Restore `archive` onto the device under the given remaining-file policy.
pub(crate) fn restore<T: Transport>(
    fs: &mut DeviceFs<'_, T>,
    archive: &Path,
    policy: RemainingPolicy,
) -> Result<SyncSummary, BoardError> {
    let contents = read_archive(archive)?;
    let (plan, remote_dirs) = plan_restore(fs, &contents)?;
    info!(
        "restore plan: {} create, {} overwrite, {} unchanged, {} remaining",
        plan.create.len(),
        plan.overwrite.len(),
        plan.unchanged.len(),
        plan.remaining.len()
    );

    let mut summary = SyncSummary {
        unchanged: plan.unchanged,
        ..Default::default()
    };

    // Directories before the files they contain; BTreeSet order already
    // puts parents first, missing ones are created shallow-to-deep.
    for dir in &contents.dirs {
        if remote_dirs.contains(dir) {
            continue;
        }
        match fs.mkdir(dir) {
            Ok(())
            | Err(BoardError::FileSystem {
                kind: FileSystemErrorKind::AlreadyExists,
                ..
            }) => {}
            Err(e) if is_abort(&e) => return Err(e),
            Err(e) => summary.failures.push(SyncFailure {
                path: dir.clone(),
                error: e.to_string(),
            }),
        }
    }

    for (paths, done) in [(&plan.create, false), (&plan.overwrite, true)] {
        for path in paths {
            if fs.cancel().is_cancelled() {
                return Err(BoardError::Interrupted);
            }
            let data = &contents.files[path];
            fs.events().status(format!("Writing {}", path));
            match fs.write_file(path, data) {
                Ok(()) => {
                    summary.bytes_transferred += data.len() as u64;
                    if done {
                        summary.overwritten.push(path.clone());
                    } else {
                        summary.created.push(path.clone());
                    }
                }
                Err(e) if is_abort(&e) => return Err(e),
                Err(e) => {
                    debug!("restore of {} failed: {}", path, e);
                    summary.failures.push(SyncFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    // Remaining files are surfaced under the caller's explicit policy; a
    // keep policy leaves them untouched.
    for path in plan.remaining {
        let disposition = match policy {
            RemainingPolicy::Keep => RemainingDisposition::Kept,
            RemainingPolicy::Delete => match fs.delete(&path) {
                Ok(()) => RemainingDisposition::Deleted,
                Err(e) if is_abort(&e) => return Err(e),
                Err(e) => RemainingDisposition::DeleteFailed(e.to_string()),
            },
        };
        summary.remaining.push(RemainingFile { path, disposition });
    }

    // Under a delete policy, also drop directories that exist only on the
    // device, deepest first so they are empty by the time they are removed.
    if policy == RemainingPolicy::Delete {
        let mut stale: Vec<&String> = remote_dirs
            .iter()
            .filter(|d| !contents.dirs.contains(*d))
            .collect();
        stale.sort_by_key(|d| std::cmp::Reverse(d.len()));
        for dir in stale {
            match fs.rmdir(dir) {
                Ok(()) => {}
                Err(e) if is_abort(&e) => return Err(e),
                // Still holding kept or failed files; leave it.
                Err(_) => {}
            }
        }
    }

    info!(
        "restore complete: {} created, {} overwritten, {} failures",
        summary.created.len(),
        summary.overwritten.len(),
        summary.failures.len()
    );
    Ok(summary)
}
