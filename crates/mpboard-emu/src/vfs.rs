//! Virtual filesystem of the emulated board.

use std::collections::BTreeMap;

/// A node in the virtual filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Regular file with content.
    File(Vec<u8>),
    /// Directory.
    Dir,
}

/// Result of a virtual filesystem operation, carrying the errno the real
/// firmware would raise.
pub type VfsResult<T> = Result<T, VfsError>;

/// Errno-style failures, rendered into `OSError` tracebacks by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    /// ENOENT
    NotFound,
    /// EEXIST
    Exists,
    /// ENOTEMPTY
    NotEmpty,
    /// EISDIR
    IsDir,
}

impl VfsError {
    /// The errno number MicroPython reports for this failure.
    pub fn errno(self) -> i32 {
        match self {
            VfsError::NotFound => 2,
            VfsError::Exists => 17,
            VfsError::NotEmpty => 39,
            VfsError::IsDir => 21,
        }
    }

    /// The symbolic name used in `[Errno N] NAME` renderings.
    pub fn name(self) -> &'static str {
        match self {
            VfsError::NotFound => "ENOENT",
            VfsError::Exists => "EEXIST",
            VfsError::NotEmpty => "ENOTEMPTY",
            VfsError::IsDir => "EISDIR",
        }
    }
}

/// The board's filesystem: absolute slash-separated paths to nodes. The
/// root directory is implicit.
#[derive(Debug, Default, Clone)]
pub struct Vfs {
    nodes: BTreeMap<String, Node>,
}

impl Vfs {
    /// Empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some(("", _)) | None => true,
            Some((parent, _)) => matches!(self.nodes.get(parent), Some(Node::Dir)),
        }
    }

    /// Look up a node.
    pub fn get(&self, path: &str) -> Option<&Node> {
        if path == "/" {
            return Some(&Node::Dir);
        }
        self.nodes.get(path)
    }

    /// Whether the path exists.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// File content at `path`.
    pub fn read(&self, path: &str) -> VfsResult<&[u8]> {
        match self.get(path) {
            Some(Node::File(data)) => Ok(data),
            Some(Node::Dir) => Err(VfsError::IsDir),
            None => Err(VfsError::NotFound),
        }
    }

    /// Create or truncate a file. The parent directory must exist.
    pub fn create(&mut self, path: &str) -> VfsResult<()> {
        if matches!(self.get(path), Some(Node::Dir)) {
            return Err(VfsError::IsDir);
        }
        if !self.parent_exists(path) {
            return Err(VfsError::NotFound);
        }
        self.nodes.insert(path.to_string(), Node::File(Vec::new()));
        Ok(())
    }

    /// Append bytes to an existing file.
    pub fn append(&mut self, path: &str, data: &[u8]) -> VfsResult<()> {
        match self.nodes.get_mut(path) {
            Some(Node::File(content)) => {
                content.extend_from_slice(data);
                Ok(())
            }
            Some(Node::Dir) => Err(VfsError::IsDir),
            None => Err(VfsError::NotFound),
        }
    }

    /// Write a whole file, creating parent directories implicitly. Test
    /// setup helper; the device itself goes through `create`/`append`.
    pub fn put(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        let mut parent = path.rsplit_once('/').map(|(p, _)| p.to_string());
        while let Some(p) = parent.filter(|p| !p.is_empty()) {
            parent = p.rsplit_once('/').map(|(q, _)| q.to_string());
            self.nodes.entry(p).or_insert(Node::Dir);
        }
        self.nodes.insert(path.to_string(), Node::File(data.into()));
    }

    /// Create a directory.
    pub fn mkdir(&mut self, path: &str) -> VfsResult<()> {
        if self.exists(path) {
            return Err(VfsError::Exists);
        }
        if !self.parent_exists(path) {
            return Err(VfsError::NotFound);
        }
        self.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    /// Remove a file.
    pub fn remove(&mut self, path: &str) -> VfsResult<()> {
        match self.get(path) {
            Some(Node::File(_)) => {
                self.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(VfsError::IsDir),
            None => Err(VfsError::NotFound),
        }
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> VfsResult<()> {
        match self.get(path) {
            Some(Node::Dir) => {
                if !self.children(path).is_empty() {
                    return Err(VfsError::NotEmpty);
                }
                self.nodes.remove(path);
                Ok(())
            }
            Some(Node::File(_)) => Err(VfsError::NotFound),
            None => Err(VfsError::NotFound),
        }
    }

    /// Rename a file or directory.
    pub fn rename(&mut self, from: &str, to: &str) -> VfsResult<()> {
        let node = self.nodes.remove(from).ok_or(VfsError::NotFound)?;
        self.nodes.insert(to.to_string(), node);
        Ok(())
    }

    /// Direct children of a directory: `(name, node)` pairs.
    pub fn children(&self, dir: &str) -> Vec<(String, &Node)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .iter()
            .filter(|(path, _)| {
                path.starts_with(&prefix) && !path[prefix.len()..].contains('/')
            })
            .map(|(path, node)| (path[prefix.len()..].to_string(), node))
            .collect()
    }

    /// All paths, for test assertions.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_creates_parents() {
        let mut vfs = Vfs::new();
        vfs.put("/lib/util/helpers.py", b"x = 1".to_vec());
        assert!(matches!(vfs.get("/lib"), Some(Node::Dir)));
        assert!(matches!(vfs.get("/lib/util"), Some(Node::Dir)));
        assert_eq!(vfs.read("/lib/util/helpers.py").unwrap(), b"x = 1");
    }

    #[test]
    fn test_children_are_direct_only() {
        let mut vfs = Vfs::new();
        vfs.put("/a.py", b"".to_vec());
        vfs.put("/lib/b.py", b"".to_vec());
        let names: Vec<String> = vfs.children("/").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.py".to_string(), "lib".to_string()]);
        let names: Vec<String> = vfs.children("/lib").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b.py".to_string()]);
    }

    #[test]
    fn test_rmdir_refuses_non_empty() {
        let mut vfs = Vfs::new();
        vfs.put("/lib/b.py", b"".to_vec());
        assert_eq!(vfs.rmdir("/lib"), Err(VfsError::NotEmpty));
        vfs.remove("/lib/b.py").unwrap();
        assert_eq!(vfs.rmdir("/lib"), Ok(()));
    }

    #[test]
    fn test_mkdir_requires_parent() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.mkdir("/a/b"), Err(VfsError::NotFound));
        assert_eq!(vfs.mkdir("/a"), Ok(()));
        assert_eq!(vfs.mkdir("/a/b"), Ok(()));
        assert_eq!(vfs.mkdir("/a"), Err(VfsError::Exists));
    }
}
