//! Snippet interpreter.
//!
//! The emulated board does not run Python. It recognizes the snippet shapes
//! the communication core generates (plus a handful of canned test
//! programs) and applies them to the virtual filesystem, producing the same
//! stdout and tracebacks the real firmware would.

use crate::vfs::{Node, Vfs, VfsError};
use sha2::{Digest, Sha256};

/// Result of executing one code body.
pub(crate) enum ExecOutcome {
    /// Execution finished; the response can be sent.
    Done {
        /// Bytes printed to stdout.
        stdout: Vec<u8>,
        /// Traceback text, when the program raised.
        exception: Option<String>,
    },
    /// The program never finishes on its own (`while True`); output is
    /// produced only when an interrupt arrives.
    Hang,
}

impl ExecOutcome {
    fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        ExecOutcome::Done {
            stdout: stdout.into(),
            exception: None,
        }
    }

    fn raise(kind: &str, message: &str) -> Self {
        ExecOutcome::Done {
            stdout: Vec::new(),
            exception: Some(traceback(kind, message)),
        }
    }

    fn os_error(err: VfsError) -> Self {
        ExecOutcome::raise("OSError", &format!("[Errno {}] {}", err.errno(), err.name()))
    }
}

/// Render a single-frame traceback the way MicroPython does.
pub(crate) fn traceback(kind: &str, message: &str) -> String {
    format!(
        "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{}: {}\r\n",
        kind, message
    )
}

/// Session state surviving between executions (open file handles set up by
/// the chunked transfer snippets).
#[derive(Debug, Default)]
pub(crate) struct Interpreter {
    open_read: Option<(String, usize)>,
    open_write: Option<String>,
}

impl Interpreter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reset session state (soft reboot).
    pub(crate) fn reset(&mut self) {
        self.open_read = None;
        self.open_write = None;
    }

    /// Execute one code body against the filesystem.
    pub(crate) fn run(&mut self, code: &str, vfs: &mut Vfs) -> ExecOutcome {
        let code = code.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');

        // Filesystem snippet vocabulary, most specific first.
        if code.contains("os.ilistdir") {
            return self.run_listing(code, vfs);
        }
        if code.contains("os.stat(") && code.contains("json.dumps") {
            return self.run_stat(code, vfs);
        }
        if code.contains("os.uname()") {
            return ExecOutcome::ok(
                "{\"sysname\": \"emu\", \"nodename\": \"emu\", \"release\": \"1.23.0\", \
                 \"version\": \"v1.23.0-emulated\", \"machine\": \"mpboard-emu\"}\r\n",
            );
        }
        if code.contains("uhashlib.sha256") {
            return self.run_sha256(code, vfs);
        }
        if code.contains("os.rename(") {
            return self.run_rename(code, vfs);
        }
        if code.starts_with("import os\nos.remove(") {
            return self.run_fs_op(code, "os.remove(", vfs, Vfs::remove);
        }
        if code.starts_with("import os\nos.mkdir(") {
            return self.run_fs_op(code, "os.mkdir(", vfs, Vfs::mkdir);
        }
        if code.starts_with("import os\nos.rmdir(") {
            return self.run_fs_op(code, "os.rmdir(", vfs, Vfs::rmdir);
        }
        if code.starts_with("f = open(") && code.contains("'rb'") {
            return self.run_open_read(code, vfs);
        }
        if code.starts_with("f = open(") && code.contains("'wb'") {
            return self.run_open_write(code, vfs);
        }
        if code.starts_with("print(ubinascii.hexlify(r(") {
            return self.run_read_chunk(code, vfs);
        }
        if code.starts_with("w(ubinascii.unhexlify('") {
            return self.run_write_chunk(code, vfs);
        }
        if code == "f.close()" {
            self.open_read = None;
            self.open_write = None;
            return ExecOutcome::ok("");
        }

        // Canned programs used by tests.
        if let Some(inner) = code.strip_prefix("print(").and_then(|c| c.strip_suffix(")")) {
            return run_print(inner);
        }
        if let Some(rest) = code.strip_prefix("raise ") {
            let kind = rest.split('(').next().unwrap_or("Exception").trim();
            let message = quoted_in_line(rest).unwrap_or_default();
            return ExecOutcome::raise(kind, &message);
        }
        if code.contains("while True") {
            return ExecOutcome::Hang;
        }

        // Anything else "runs" silently, like exec of a statement list.
        ExecOutcome::ok("")
    }

    // ========================================================================
    // Filesystem snippets
    // ========================================================================

    fn run_listing(&mut self, code: &str, vfs: &Vfs) -> ExecOutcome {
        let root = match quoted_after(code, "print(json.dumps(_w(") {
            Some(root) => root,
            None => return ExecOutcome::raise("NameError", "name '_w' isn't defined"),
        };
        if !root.is_empty() && !matches!(vfs.get(&root), Some(Node::Dir)) {
            return ExecOutcome::os_error(VfsError::NotFound);
        }
        let mut items = Vec::new();
        walk(vfs, &root, &mut items);
        ExecOutcome::ok(format!("[{}]\r\n", items.join(", ")))
    }

    fn run_stat(&mut self, code: &str, vfs: &Vfs) -> ExecOutcome {
        let path = match quoted_after(code, "os.stat(") {
            Some(path) => path,
            None => return ExecOutcome::raise("TypeError", "function missing 1 required positional arguments"),
        };
        match vfs.get(&path) {
            Some(Node::Dir) => ExecOutcome::ok("{\"k\": \"d\", \"s\": 0}\r\n"),
            Some(Node::File(data)) => {
                ExecOutcome::ok(format!("{{\"k\": \"f\", \"s\": {}}}\r\n", data.len()))
            }
            None => ExecOutcome::os_error(VfsError::NotFound),
        }
    }

    fn run_sha256(&mut self, code: &str, vfs: &Vfs) -> ExecOutcome {
        let path = match quoted_after(code, "open(") {
            Some(path) => path,
            None => return ExecOutcome::raise("TypeError", "can't convert 'NoneType' object to str"),
        };
        match vfs.read(&path) {
            Ok(data) => {
                let digest = hex::encode(Sha256::digest(data));
                ExecOutcome::ok(format!("{}\r\n", digest))
            }
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_rename(&mut self, code: &str, vfs: &mut Vfs) -> ExecOutcome {
        let args = quoted_args_in_line(code, "os.rename(");
        let (from, to) = match (args.first(), args.get(1)) {
            (Some(from), Some(to)) => (from.clone(), to.clone()),
            _ => return ExecOutcome::raise("TypeError", "function takes 2 positional arguments"),
        };
        match vfs.rename(&from, &to) {
            Ok(()) => ExecOutcome::ok(""),
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_fs_op(
        &mut self,
        code: &str,
        marker: &str,
        vfs: &mut Vfs,
        op: fn(&mut Vfs, &str) -> Result<(), VfsError>,
    ) -> ExecOutcome {
        let path = match quoted_after(code, marker) {
            Some(path) => path,
            None => return ExecOutcome::raise("TypeError", "function missing 1 required positional arguments"),
        };
        match op(vfs, &path) {
            Ok(()) => ExecOutcome::ok(""),
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_open_read(&mut self, code: &str, vfs: &Vfs) -> ExecOutcome {
        let path = match quoted_after(code, "open(") {
            Some(path) => path,
            None => return ExecOutcome::raise("TypeError", "can't convert 'NoneType' object to str"),
        };
        match vfs.read(&path) {
            Ok(_) => {
                self.open_read = Some((path, 0));
                ExecOutcome::ok("")
            }
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_open_write(&mut self, code: &str, vfs: &mut Vfs) -> ExecOutcome {
        let path = match quoted_after(code, "open(") {
            Some(path) => path,
            None => return ExecOutcome::raise("TypeError", "can't convert 'NoneType' object to str"),
        };
        match vfs.create(&path) {
            Ok(()) => {
                self.open_write = Some(path);
                ExecOutcome::ok("")
            }
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_read_chunk(&mut self, code: &str, vfs: &Vfs) -> ExecOutcome {
        let count = number_after(code, "hexlify(r(").unwrap_or(256);
        let (path, pos) = match &self.open_read {
            Some((path, pos)) => (path.clone(), *pos),
            None => return ExecOutcome::raise("NameError", "name 'r' isn't defined"),
        };
        match vfs.read(&path) {
            Ok(data) => {
                let end = (pos + count).min(data.len());
                let chunk = &data[pos.min(data.len())..end];
                self.open_read = Some((path, end));
                ExecOutcome::ok(format!("{}\r\n", hex::encode(chunk)))
            }
            Err(e) => ExecOutcome::os_error(e),
        }
    }

    fn run_write_chunk(&mut self, code: &str, vfs: &mut Vfs) -> ExecOutcome {
        let hex_data = match quoted_after(code, "unhexlify(") {
            Some(hex_data) => hex_data,
            None => return ExecOutcome::raise("ValueError", "odd-length string"),
        };
        let data = match hex::decode(&hex_data) {
            Ok(data) => data,
            Err(_) => return ExecOutcome::raise("ValueError", "non-hex digit found"),
        };
        let path = match &self.open_write {
            Some(path) => path.clone(),
            None => return ExecOutcome::raise("NameError", "name 'w' isn't defined"),
        };
        match vfs.append(&path, &data) {
            Ok(()) => ExecOutcome::ok(""),
            Err(e) => ExecOutcome::os_error(e),
        }
    }
}

/// Depth-first walk producing the listing snippet's JSON objects.
fn walk(vfs: &Vfs, dir: &str, out: &mut Vec<String>) {
    let lookup = if dir.is_empty() { "/" } else { dir };
    for (name, node) in vfs.children(lookup) {
        let path = format!("{}/{}", dir, name);
        match node {
            Node::Dir => {
                out.push(format!(
                    "{{\"p\": \"{}\", \"k\": \"d\", \"s\": 0}}",
                    escape_json(&path)
                ));
                walk(vfs, &path, out);
            }
            Node::File(data) => {
                out.push(format!(
                    "{{\"p\": \"{}\", \"k\": \"f\", \"s\": {}}}",
                    escape_json(&path),
                    data.len()
                ));
            }
        }
    }
}

fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Handle the canned `print(...)` programs: integer sums, integer literals,
/// and quoted strings.
fn run_print(inner: &str) -> ExecOutcome {
    let inner = inner.trim();
    if let Some((a, b)) = inner.split_once('+') {
        if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
            return ExecOutcome::ok(format!("{}\r\n", a + b));
        }
    }
    if let Ok(value) = inner.parse::<i64>() {
        return ExecOutcome::ok(format!("{}\r\n", value));
    }
    if let Some(text) = quoted_in_line(inner) {
        return ExecOutcome::ok(format!("{}\r\n", text));
    }
    ExecOutcome::ok("\r\n")
}

// ============================================================================
// Tiny extraction helpers
// ============================================================================

/// First single-quoted literal after `marker`, unescaped.
fn quoted_after(code: &str, marker: &str) -> Option<String> {
    let idx = code.find(marker)? + marker.len();
    quoted_in_line(&code[idx..])
}

/// First single-quoted literal in `s`, unescaped.
fn quoted_in_line(s: &str) -> Option<String> {
    let start = s.find('\'')? + 1;
    let mut out = String::new();
    let mut chars = s[start..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '\'' => return Some(out),
            c => out.push(c),
        }
    }
    None
}

/// All single-quoted literals on the marker's line.
fn quoted_args_in_line(code: &str, marker: &str) -> Vec<String> {
    let idx = match code.find(marker) {
        Some(idx) => idx + marker.len(),
        None => return Vec::new(),
    };
    let rest = &code[idx..];
    let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
    let mut args = Vec::new();
    let mut remaining = line;
    while let Some(arg) = quoted_in_line(remaining) {
        // Advance past this literal: opening quote, content, closing quote.
        let start = remaining.find('\'').unwrap_or(0);
        let consumed = start + 1 + arg.len() + 1;
        args.push(arg);
        if consumed >= remaining.len() {
            break;
        }
        remaining = &remaining[consumed..];
    }
    args
}

/// Decimal number directly after `marker`.
fn number_after(code: &str, marker: &str) -> Option<usize> {
    let idx = code.find(marker)? + marker.len();
    let digits: String = code[idx..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_one(code: &str, vfs: &mut Vfs) -> (Vec<u8>, Option<String>) {
        match Interpreter::new().run(code, vfs) {
            ExecOutcome::Done { stdout, exception } => (stdout, exception),
            ExecOutcome::Hang => panic!("unexpected hang"),
        }
    }

    #[test]
    fn test_print_sum() {
        let mut vfs = Vfs::new();
        let (stdout, exc) = run_one("print(1+1)", &mut vfs);
        assert_eq!(stdout, b"2\r\n");
        assert!(exc.is_none());
    }

    #[test]
    fn test_raise_value_error() {
        let mut vfs = Vfs::new();
        let (_, exc) = run_one("raise ValueError('x')", &mut vfs);
        let exc = exc.unwrap();
        assert!(exc.contains("ValueError: x"));
    }

    #[test]
    fn test_while_true_hangs() {
        let mut vfs = Vfs::new();
        assert!(matches!(
            Interpreter::new().run("while True: pass", &mut vfs),
            ExecOutcome::Hang
        ));
    }

    #[test]
    fn test_stat_missing_file_raises_enoent() {
        let mut vfs = Vfs::new();
        let (_, exc) = run_one(
            "import os, json\ns = os.stat('/nope')\nprint(json.dumps({'k': 'd' if (s[0] & 0x4000) else 'f', 's': s[6]}))",
            &mut vfs,
        );
        assert!(exc.unwrap().contains("[Errno 2] ENOENT"));
    }

    #[test]
    fn test_chunked_read_session() {
        let mut vfs = Vfs::new();
        vfs.put("/data.bin", vec![0xAB; 5]);
        let mut interp = Interpreter::new();

        match interp.run("f = open('/data.bin', 'rb')\nimport ubinascii\nr = f.read", &mut vfs) {
            ExecOutcome::Done { exception: None, .. } => {}
            _ => panic!("open failed"),
        }
        let chunk = "print(ubinascii.hexlify(r(4)).decode())";
        match interp.run(chunk, &mut vfs) {
            ExecOutcome::Done { stdout, .. } => assert_eq!(stdout, b"abababab\r\n"),
            _ => panic!(),
        }
        match interp.run(chunk, &mut vfs) {
            ExecOutcome::Done { stdout, .. } => assert_eq!(stdout, b"ab\r\n"),
            _ => panic!(),
        }
        // EOF is an empty line.
        match interp.run(chunk, &mut vfs) {
            ExecOutcome::Done { stdout, .. } => assert_eq!(stdout, b"\r\n"),
            _ => panic!(),
        }
    }

    #[test]
    fn test_quoted_args_with_escapes() {
        assert_eq!(quoted_in_line("open('it\\'s', 'rb')").unwrap(), "it's");
        let args = quoted_args_in_line("import os\nos.rename('/a', '/b')", "os.rename(");
        assert_eq!(args, vec!["/a".to_string(), "/b".to_string()]);
    }
}
