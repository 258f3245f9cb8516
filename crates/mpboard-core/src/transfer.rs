//! Remote filesystem operations.
//!
//! Everything here is implemented as generated MicroPython snippets pushed
//! through [`ReplController::execute`]; there is no second wire protocol.
//! Structured results come back as JSON printed by the device; file content
//! crosses the link hex-encoded in bounded chunks, with the returning raw
//! prompt acting as the implicit acknowledgment between chunks.

use crate::config::BoardConfig;
use crate::error::{map_os_error, BoardError, FileSystemErrorKind};
use crate::repl::ReplController;
use crate::request::{CancelToken, DeviceVersion, EntryKind, EventSink, RemoteFileEntry};
use crate::transport::Transport;
use serde::Deserialize;
use tracing::debug;

/// JSON shape printed by the listing and stat snippets.
#[derive(Debug, Deserialize)]
struct WireEntry {
    #[serde(default)]
    p: String,
    k: String,
    s: u64,
}

impl WireEntry {
    fn into_entry(self, fallback_path: &str) -> RemoteFileEntry {
        let path = if self.p.is_empty() {
            fallback_path.to_string()
        } else {
            self.p
        };
        RemoteFileEntry {
            path,
            size: self.s,
            kind: if self.k == "d" {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
        }
    }
}

/// Remote filesystem session bound to one worker-owned controller.
pub(crate) struct DeviceFs<'a, T: Transport> {
    repl: &'a mut ReplController<T>,
    config: &'a BoardConfig,
    cancel: &'a CancelToken,
    events: &'a EventSink,
}

impl<'a, T: Transport> DeviceFs<'a, T> {
    pub(crate) fn new(
        repl: &'a mut ReplController<T>,
        config: &'a BoardConfig,
        cancel: &'a CancelToken,
        events: &'a EventSink,
    ) -> Self {
        DeviceFs {
            repl,
            config,
            cancel,
            events,
        }
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        self.cancel
    }

    pub(crate) fn events(&self) -> &EventSink {
        self.events
    }

    /// Run a snippet, mapping a device `OSError` to a filesystem error for
    /// `path` and any other exception to [`BoardError::Execution`]. Returns
    /// stdout.
    fn run(&mut self, code: &str, path: &str) -> Result<Vec<u8>, BoardError> {
        let output = self
            .repl
            .execute(code, self.config.exec_timeout, self.cancel, None)?;
        match output.exception {
            None => Ok(output.stdout),
            Some(traceback) => {
                if traceback.contains("OSError") {
                    Err(map_os_error(&traceback, path))
                } else {
                    Err(BoardError::Execution { traceback })
                }
            }
        }
    }

    /// Run a snippet whose stdout is a single JSON document.
    fn run_json<D: for<'de> Deserialize<'de>>(
        &mut self,
        code: &str,
        path: &str,
    ) -> Result<D, BoardError> {
        let stdout = self.run(code, path)?;
        let text = String::from_utf8_lossy(&stdout);
        serde_json::from_str(text.trim()).map_err(|e| {
            debug!("JSON parse failed for {}: {}", path, e);
            BoardError::Protocol(mpboard_protocol::ProtocolError::UnexpectedBytes {
                expected: "JSON result",
                got: stdout[..stdout.len().min(64)].to_vec(),
            })
        })
    }

    // ========================================================================
    // Listing and metadata
    // ========================================================================

    /// Recursively list the tree under `path`.
    pub(crate) fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteFileEntry>, BoardError> {
        let path = normalize_path(path)?;
        let arg = if path == "/" { String::new() } else { path.clone() };
        let code = format!(
            "import os, json\n\
             def _w(d):\n\
             \x20r = []\n\
             \x20for e in os.ilistdir(d if d else '/'):\n\
             \x20\x20p = d + '/' + e[0]\n\
             \x20\x20if e[1] & 0x4000:\n\
             \x20\x20\x20r.append({{'p': p, 'k': 'd', 's': 0}})\n\
             \x20\x20\x20r.extend(_w(p))\n\
             \x20\x20else:\n\
             \x20\x20\x20s = e[3] if len(e) > 3 else os.stat(p)[6]\n\
             \x20\x20\x20r.append({{'p': p, 'k': 'f', 's': s}})\n\
             \x20return r\n\
             print(json.dumps(_w({})))",
            py_str(&arg)
        );
        let entries: Vec<WireEntry> = self.run_json(&code, &path)?;
        Ok(entries.into_iter().map(|e| e.into_entry(&path)).collect())
    }

    /// Stat a single path.
    pub(crate) fn stat(&mut self, path: &str) -> Result<RemoteFileEntry, BoardError> {
        let path = normalize_path(path)?;
        let code = format!(
            "import os, json\n\
             s = os.stat({})\n\
             print(json.dumps({{'k': 'd' if (s[0] & 0x4000) else 'f', 's': s[6]}}))",
            py_str(&path)
        );
        let entry: WireEntry = self.run_json(&code, &path)?;
        Ok(entry.into_entry(&path))
    }

    /// Firmware identification via `os.uname()`.
    pub(crate) fn version(&mut self) -> Result<DeviceVersion, BoardError> {
        let code = "import os, json\n\
                    u = os.uname()\n\
                    print(json.dumps({'sysname': u.sysname, 'nodename': u.nodename, \
                    'release': u.release, 'version': u.version, 'machine': u.machine}))";
        self.run_json(code, "/")
    }

    /// SHA-256 of a remote file, as lowercase hex. Used by restore planning.
    pub(crate) fn sha256(&mut self, path: &str) -> Result<String, BoardError> {
        let path = normalize_path(path)?;
        let code = format!(
            "import uhashlib, ubinascii\n\
             h = uhashlib.sha256()\n\
             f = open({}, 'rb')\n\
             while True:\n\
             \x20b = f.read(256)\n\
             \x20if not b:\n\
             \x20\x20break\n\
             \x20h.update(b)\n\
             f.close()\n\
             print(ubinascii.hexlify(h.digest()).decode())",
            py_str(&path)
        );
        let stdout = self.run(&code, &path)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    // ========================================================================
    // Content transfer
    // ========================================================================

    /// Read a file's content in bounded hex-encoded chunks.
    ///
    /// The reassembled length is checked against the size the device
    /// reports; a mismatch is a [`BoardError::TransferIntegrity`] failure.
    pub(crate) fn read_file(&mut self, path: &str) -> Result<Vec<u8>, BoardError> {
        let path = normalize_path(path)?;
        let entry = self.stat(&path)?;
        if entry.kind == EntryKind::Directory {
            return Err(BoardError::FileSystem {
                kind: FileSystemErrorKind::Other,
                path,
            });
        }

        self.run(
            &format!("f = open({}, 'rb')\nimport ubinascii\nr = f.read", py_str(&path)),
            &path,
        )?;

        let chunk_code = format!(
            "print(ubinascii.hexlify(r({})).decode())",
            self.config.chunk_size
        );
        let mut content = Vec::with_capacity(entry.size as usize);
        loop {
            if self.cancel.is_cancelled() {
                let _ = self.run("f.close()", &path);
                return Err(BoardError::Interrupted);
            }
            let stdout = self.run(&chunk_code, &path)?;
            let line = String::from_utf8_lossy(&stdout);
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let chunk = hex::decode(line).map_err(|_| {
                BoardError::Protocol(mpboard_protocol::ProtocolError::UnexpectedBytes {
                    expected: "hex chunk",
                    got: stdout[..stdout.len().min(64)].to_vec(),
                })
            })?;
            content.extend_from_slice(&chunk);
            self.events.progress(&path, content.len() as u64, entry.size);
        }
        self.run("f.close()", &path)?;

        if content.len() as u64 != entry.size {
            return Err(BoardError::TransferIntegrity {
                expected: entry.size,
                actual: content.len() as u64,
            });
        }
        debug!("read {} ({} bytes)", path, content.len());
        Ok(content)
    }

    /// Write a file in bounded hex-encoded chunks. Each chunk is one
    /// execution exchange; the returning prompt is the implicit ack.
    pub(crate) fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), BoardError> {
        let path = normalize_path(path)?;
        self.run(
            &format!("f = open({}, 'wb')\nimport ubinascii\nw = f.write", py_str(&path)),
            &path,
        )?;

        let total = data.len() as u64;
        let mut sent = 0u64;
        for chunk in data.chunks(self.config.chunk_size) {
            if self.cancel.is_cancelled() {
                let _ = self.run("f.close()", &path);
                return Err(BoardError::Interrupted);
            }
            let code = format!("w(ubinascii.unhexlify('{}'))", hex::encode(chunk));
            self.run(&code, &path)?;
            sent += chunk.len() as u64;
            self.events.progress(&path, sent, total);
        }
        self.run("f.close()", &path)?;
        debug!("wrote {} ({} bytes)", path, data.len());
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Delete a file.
    pub(crate) fn delete(&mut self, path: &str) -> Result<(), BoardError> {
        let path = normalize_path(path)?;
        let code = format!("import os\nos.remove({})", py_str(&path));
        self.run(&code, &path).map(|_| ())
    }

    /// Create a directory.
    pub(crate) fn mkdir(&mut self, path: &str) -> Result<(), BoardError> {
        let path = normalize_path(path)?;
        let code = format!("import os\nos.mkdir({})", py_str(&path));
        self.run(&code, &path).map(|_| ())
    }

    /// Remove an empty directory.
    pub(crate) fn rmdir(&mut self, path: &str) -> Result<(), BoardError> {
        let path = normalize_path(path)?;
        let code = format!("import os\nos.rmdir({})", py_str(&path));
        self.run(&code, &path).map(|_| ())
    }

    /// Rename, falling back to copy-then-delete where the firmware cannot
    /// rename across filesystems.
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> Result<(), BoardError> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        let code = format!(
            "import os\n\
             try:\n\
             \x20os.rename({0}, {1})\n\
             except OSError:\n\
             \x20src = open({0}, 'rb')\n\
             \x20dst = open({1}, 'wb')\n\
             \x20while True:\n\
             \x20\x20b = src.read(256)\n\
             \x20\x20if not b:\n\
             \x20\x20\x20break\n\
             \x20\x20dst.write(b)\n\
             \x20src.close()\n\
             \x20dst.close()\n\
             \x20os.remove({0})",
            py_str(&from),
            py_str(&to)
        );
        self.run(&code, &from).map(|_| ())
    }
}

// ============================================================================
// Path helpers
// ============================================================================

/// Normalize a remote path: leading slash, no trailing slash (except the
/// root itself), and no bytes the snippet quoting cannot carry.
pub(crate) fn normalize_path(path: &str) -> Result<String, BoardError> {
    if path.contains(['\n', '\r', '\0']) {
        return Err(BoardError::FileSystem {
            kind: FileSystemErrorKind::InvalidName,
            path: path.to_string(),
        });
    }
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

/// Quote a string as a single-quoted Python literal.
pub(crate) fn py_str(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_py_str_escapes_quotes_and_backslashes() {
        assert_eq!(py_str("main.py"), "'main.py'");
        assert_eq!(py_str("it's"), "'it\\'s'");
        assert_eq!(py_str("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("main.py").unwrap(), "/main.py");
        assert_eq!(normalize_path("/lib/").unwrap(), "/lib");
        assert!(matches!(
            normalize_path("/bad\nname"),
            Err(BoardError::FileSystem {
                kind: FileSystemErrorKind::InvalidName,
                ..
            })
        ));
    }

    #[test]
    fn test_wire_entry_conversion() {
        let entry = WireEntry {
            p: "/lib".into(),
            k: "d".into(),
            s: 0,
        };
        let entry = entry.into_entry("/");
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.path, "/lib");

        let entry = WireEntry {
            p: String::new(),
            k: "f".into(),
            s: 42,
        };
        let entry = entry.into_entry("/main.py");
        assert_eq!(entry.path, "/main.py");
        assert_eq!(entry.size, 42);
        assert!(entry.is_file());
    }
}
