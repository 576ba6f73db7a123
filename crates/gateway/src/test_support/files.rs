use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protocol::FileInfo;

use super::next_close_order;
use crate::ssh::{
    format_mode, join_remote_path, remote_basename, remote_parent, FileTransfer, SshError,
};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<BTreeMap<String, Node>>,
    closed: AtomicBool,
    close_order: Mutex<Option<u64>>,
}

/// File tree held in memory, rooted at `/`.
#[derive(Clone, Default)]
pub struct MemoryFileTransfer {
    inner: Arc<Inner>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn not_found(path: &str) -> SshError {
    SshError::Sftp(format!("no such file: {}", path))
}

impl MemoryFileTransfer {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, creating no parents.
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.nodes().insert(normalize(path), Node::File(data.to_vec()));
        self
    }

    /// Adds a directory.
    pub fn with_dir(self, path: &str) -> Self {
        self.nodes().insert(normalize(path), Node::Dir);
        self
    }

    /// Returns the contents of a file, if present.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes().get(&normalize(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns the position of the close call in the global close sequence.
    pub fn close_order(&self) -> Option<u64> {
        *self
            .inner
            .close_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn nodes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Node>> {
        self.inner
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_dir(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        path == "/" || matches!(nodes.get(path), Some(Node::Dir))
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.is_closed() {
            return Err(SshError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl FileTransfer for MemoryFileTransfer {
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SshError> {
        self.ensure_open()?;
        let dir = normalize(path);
        let nodes = self.nodes();
        if !Self::is_dir(&nodes, &dir) {
            return Err(not_found(path));
        }

        Ok(nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && remote_parent(key) == dir)
            .map(|(key, node)| {
                let (is_directory, size, mode) = match node {
                    Node::Dir => (true, 0, 0o040755),
                    Node::File(data) => (false, data.len() as u64, 0o100644),
                };
                let name = remote_basename(key);
                FileInfo {
                    name: name.to_string(),
                    path: join_remote_path(&dir, name),
                    is_directory,
                    size,
                    modified_time: DateTime::<Utc>::UNIX_EPOCH,
                    permissions: format_mode(mode, is_directory),
                }
            })
            .collect())
    }

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<(), SshError> {
        self.ensure_open()?;
        let path = normalize(remote_path);
        let mut nodes = self.nodes();
        if !Self::is_dir(&nodes, remote_parent(&path)) {
            return Err(not_found(remote_path));
        }
        if matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(SshError::Sftp(format!("is a directory: {}", remote_path)));
        }
        nodes.insert(path, Node::File(data.to_vec()));
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError> {
        self.ensure_open()?;
        self.file(remote_path).ok_or_else(|| not_found(remote_path))
    }

    async fn delete(&self, path: &str) -> Result<(), SshError> {
        self.ensure_open()?;
        let mut nodes = self.nodes();
        match nodes.get(&normalize(path)) {
            Some(Node::File(_)) => {
                nodes.remove(&normalize(path));
                Ok(())
            }
            Some(Node::Dir) => {
                let dir = normalize(path);
                let prefix = format!("{}/", dir);
                if nodes.keys().any(|key| key.starts_with(&prefix)) {
                    return Err(SshError::Sftp(format!("directory not empty: {}", path)));
                }
                nodes.remove(&dir);
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), SshError> {
        self.ensure_open()?;
        let path = normalize(path);
        let mut nodes = self.nodes();
        if nodes.contains_key(&path) || path == "/" {
            return Err(SshError::Sftp(format!("already exists: {}", path)));
        }
        if !Self::is_dir(&nodes, remote_parent(&path)) {
            return Err(not_found(&path));
        }
        nodes.insert(path, Node::Dir);
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), SshError> {
        self.ensure_open()?;
        let old = normalize(old_path);
        let new = normalize(new_path);
        let mut nodes = self.nodes();
        if !nodes.contains_key(&old) {
            return Err(not_found(old_path));
        }
        if nodes.contains_key(&new) {
            return Err(SshError::Sftp(format!("already exists: {}", new_path)));
        }

        // Move the entry and everything below it.
        let prefix = format!("{}/", old);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|key| **key == old || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let renamed = format!("{}{}", new, &key[old.len()..]);
                nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SshError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            *self
                .inner
                .close_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(next_close_order());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_root_and_nested() {
        let files = MemoryFileTransfer::new()
            .with_dir("/etc")
            .with_file("/etc/hosts", b"127.0.0.1 localhost\n")
            .with_file("/readme", b"hi");

        let root = files.list("/").await.unwrap();
        let paths: Vec<_> = root.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/etc", "/readme"]);
        assert!(root[0].is_directory);
        assert_eq!(root[0].permissions, "drwxr-xr-x");

        let etc = files.list("/etc/").await.unwrap();
        assert_eq!(etc.len(), 1);
        assert_eq!(etc[0].name, "hosts");
        assert_eq!(etc[0].size, 20);
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let files = MemoryFileTransfer::new();
        assert!(matches!(files.list("/nope").await, Err(SshError::Sftp(_))));
    }

    #[tokio::test]
    async fn test_rename_moves_children() {
        let files = MemoryFileTransfer::new()
            .with_dir("/a")
            .with_file("/a/x", b"1");

        files.rename("/a", "/b").await.unwrap();

        assert_eq!(files.file("/b/x"), Some(b"1".to_vec()));
        assert_eq!(files.file("/a/x"), None);
    }

    #[tokio::test]
    async fn test_delete_empty_directory() {
        let files = MemoryFileTransfer::new()
            .with_dir("/tmp")
            .with_dir("/tmp/old");

        files.delete("/tmp/old").await.unwrap();

        let entries = files.list("/tmp").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory_fails() {
        let files = MemoryFileTransfer::new()
            .with_dir("/data")
            .with_file("/data/keep", b"1");

        assert!(matches!(files.delete("/data").await, Err(SshError::Sftp(_))));
        assert_eq!(files.file("/data/keep"), Some(b"1".to_vec()));
        assert_eq!(files.list("/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let files = MemoryFileTransfer::new().with_file("/f", b"data");
        files.close().await.unwrap();

        assert!(files.is_closed());
        assert!(files.close_order().is_some());
        assert!(matches!(files.download("/f").await, Err(SshError::Closed)));
    }
}
