//! SFTP file transfer over an SSH subsystem channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protocol::FileInfo;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{format_mode, join_remote_path, FileTransfer, SshError};

fn sftp_err(e: impl std::fmt::Display) -> SshError {
    SshError::Sftp(e.to_string())
}

/// [`FileTransfer`] backed by `russh-sftp`.
pub struct SftpFileTransfer {
    session: SftpSession,
}

impl SftpFileTransfer {
    /// Runs the SFTP handshake over an already-requested subsystem stream.
    pub async fn start<S>(stream: S) -> Result<Self, SshError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = SftpSession::new(stream).await.map_err(sftp_err)?;
        Ok(Self { session })
    }
}

/// Builds a listing entry from raw attributes.
pub(crate) fn entry_info(
    dir: &str,
    name: &str,
    is_dir: bool,
    size: u64,
    mode: u32,
    mtime: u32,
) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        path: join_remote_path(dir, name),
        is_directory: is_dir,
        size,
        modified_time: DateTime::<Utc>::from_timestamp(i64::from(mtime), 0).unwrap_or_default(),
        permissions: format_mode(mode, is_dir),
    }
}

#[async_trait]
impl FileTransfer for SftpFileTransfer {
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SshError> {
        let entries = self.session.read_dir(path).await.map_err(sftp_err)?;
        let files: Vec<FileInfo> = entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| {
                let attrs = entry.metadata();
                entry_info(
                    path,
                    &entry.file_name(),
                    attrs.is_dir(),
                    attrs.size.unwrap_or(0),
                    attrs.permissions.unwrap_or(0),
                    attrs.mtime.unwrap_or(0),
                )
            })
            .collect();
        debug!(path, count = files.len(), "Listed directory");
        Ok(files)
    }

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<(), SshError> {
        let mut file = self.session.create(remote_path).await.map_err(sftp_err)?;
        file.write_all(data).await.map_err(sftp_err)?;
        file.shutdown().await.map_err(sftp_err)?;
        debug!(remote_path, bytes = data.len(), "Uploaded file");
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SshError> {
        let mut file = self.session.open(remote_path).await.map_err(sftp_err)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await.map_err(sftp_err)?;
        debug!(remote_path, bytes = data.len(), "Downloaded file");
        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<(), SshError> {
        let err = match self.session.remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        // REMOVE is unlink(2) on most servers; directories need RMDIR.
        match self.session.metadata(path).await {
            Ok(attrs) if attrs.is_dir() => {
                debug!(path, "Removing directory");
                self.session.remove_dir(path).await.map_err(sftp_err)
            }
            _ => Err(sftp_err(err)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), SshError> {
        self.session.create_dir(path).await.map_err(sftp_err)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), SshError> {
        self.session
            .rename(old_path, new_path)
            .await
            .map_err(sftp_err)
    }

    async fn close(&self) -> Result<(), SshError> {
        self.session.close().await.map_err(sftp_err)
    }
}
