//! File access on the node, relative to a configurable root.
//!
//! Steps name absolute paths (`/etc/sysctl.d/k8s.conf`). A [`Host`] maps
//! them under its root so the same steps can run against `/` on a real
//! node or against a scratch directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::BootstrapError;

/// File system view of the node.
#[derive(Debug, Clone)]
pub struct Host {
    root: PathBuf,
}

impl Default for Host {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Host {
    /// Create a host rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a node path under the root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    /// Whether the path exists.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    /// Read a file, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than a missing file.
    pub fn read_optional(&self, path: &Path) -> Result<Option<String>, BootstrapError> {
        match std::fs::read_to_string(self.resolve(path)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BootstrapError::io(path, e)),
        }
    }

    /// Read raw bytes, `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than a missing file.
    pub fn read_bytes_optional(&self, path: &Path) -> Result<Option<Vec<u8>>, BootstrapError> {
        match std::fs::read(self.resolve(path)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BootstrapError::io(path, e)),
        }
    }

    /// Write a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parents cannot be written.
    pub fn write(&self, path: &Path, content: &str) -> Result<(), BootstrapError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BootstrapError::io(path, e))?;
        }
        std::fs::write(&target, content).map_err(|e| BootstrapError::io(path, e))
    }

    /// Create a directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create_dir_all(&self, path: &Path) -> Result<(), BootstrapError> {
        std::fs::create_dir_all(self.resolve(path)).map_err(|e| BootstrapError::io(path, e))
    }

    /// Copy a file, creating the destination's parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the copy fails.
    pub fn copy(&self, from: &Path, to: &Path) -> Result<(), BootstrapError> {
        let target = self.resolve(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BootstrapError::io(to, e))?;
        }
        std::fs::copy(self.resolve(from), &target)
            .map(|_| ())
            .map_err(|e| BootstrapError::io(from, e))
    }

    /// Append `line` unless the file already has it as a whole line.
    ///
    /// Returns whether the file changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn append_line_once(&self, path: &Path, line: &str) -> Result<bool, BootstrapError> {
        let mut content = self.read_optional(path)?.unwrap_or_default();
        if content.lines().any(|l| l == line) {
            return Ok(false);
        }

        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(line);
        content.push('\n');
        self.write(path, &content)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_under_root() {
        let host = Host::new("/tmp/node");
        assert_eq!(
            host.resolve(Path::new("/etc/fstab")),
            PathBuf::from("/tmp/node/etc/fstab")
        );
        assert_eq!(Host::default().resolve(Path::new("/etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_append_line_once() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let bashrc = Path::new("/root/.bashrc");
        host.write(bashrc, "alias ll='ls -l'").unwrap();

        assert!(host.append_line_once(bashrc, "export A=1").unwrap());
        assert!(!host.append_line_once(bashrc, "export A=1").unwrap());
        assert_eq!(
            host.read_optional(bashrc).unwrap().unwrap(),
            "alias ll='ls -l'\nexport A=1\n"
        );
    }

    #[test]
    fn test_copy_creates_parent() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        host.write(Path::new("/etc/kubernetes/admin.conf"), "kubeconfig").unwrap();
        host.copy(
            Path::new("/etc/kubernetes/admin.conf"),
            Path::new("/home/ubuntu/.kube/config"),
        )
        .unwrap();

        assert!(host.exists(Path::new("/home/ubuntu/.kube/config")));
        assert!(host.read_optional(Path::new("/missing")).unwrap().is_none());
    }
}
