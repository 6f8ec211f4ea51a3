//! SFTP backend over an authenticated SSH session

use async_trait::async_trait;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::backend::{BoxedReader, BoxedWriter, FileBackend};
use super::error::SftpError;
use super::path_utils::{file_name, PathStyle};
use super::types::{timestamp_from_unix, EntryKind, FileEntry};
use crate::ssh::HandleController;

pub struct RemoteBackend {
    sftp: RusshSftpSession,
    label: String,
}

fn kind_of(attrs: &FileAttributes) -> EntryKind {
    if attrs.is_symlink() {
        EntryKind::Symlink
    } else if attrs.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// `target` holds the followed attributes of a symlink; a link to a file
/// reports the file's size
fn entry_from(name: String, attrs: &FileAttributes, target: Option<&FileAttributes>) -> FileEntry {
    let symlink_target_kind = target.map(kind_of);
    let size = match target {
        Some(target) if symlink_target_kind == Some(EntryKind::File) => target.size,
        _ => attrs.size,
    };
    FileEntry {
        name,
        kind: kind_of(attrs),
        symlink_target_kind,
        size: size.unwrap_or(0),
        modified_at: attrs.mtime.and_then(|t| timestamp_from_unix(t as i64)),
        permissions: attrs.permissions.map(|p| format!("{:o}", p & 0o777)),
    }
}

impl RemoteBackend {
    /// Open the `sftp` subsystem on a fresh session channel
    pub async fn open(controller: &HandleController, label: impl Into<String>) -> Result<Self, SftpError> {
        let label = label.into();
        info!("Opening SFTP subsystem for {}", label);

        let channel = controller
            .open_session_channel()
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::SubsystemNotAvailable(e.to_string()))?;

        info!("SFTP subsystem opened for {}", label);
        Ok(Self { sftp, label })
    }

    async fn link_target(&self, path: &str) -> Option<FileAttributes> {
        self.sftp.metadata(path).await.ok()
    }
}

#[async_trait]
impl FileBackend for RemoteBackend {
    fn path_style(&self) -> PathStyle {
        PathStyle::Remote
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        debug!("Listing remote directory: {}", path);
        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            let target = if attrs.is_symlink() {
                let full_path = super::path_utils::join_remote_path(path, &name);
                self.link_target(&full_path).await
            } else {
                None
            };
            entries.push(entry_from(name, &attrs, target.as_ref()));
        }
        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError> {
        let attrs = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;
        let target = if attrs.is_symlink() {
            self.link_target(path).await
        } else {
            None
        };
        Ok(entry_from(file_name(path).to_string(), &attrs, target.as_ref()))
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        info!("Creating remote directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        info!("Renaming {} to {}", from, to);
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| SftpError::from_sftp(e, from))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        let mut attrs = FileAttributes::empty();
        attrs.permissions = Some(mode & 0o7777);
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.sftp
            .read(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        let mut file = self
            .sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;

        file.write_all(data)
            .await
            .map_err(|e| SftpError::WriteError(format!("Failed to write {}: {}", path, e)))?;
        file.shutdown()
            .await
            .map_err(|e| SftpError::WriteError(format!("Failed to close {}: {}", path, e)))?;

        debug!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn open_reader(&self, path: &str) -> Result<BoxedReader, SftpError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;
        Ok(Box::new(file))
    }

    async fn open_writer(&self, path: &str) -> Result<BoxedWriter, SftpError> {
        let file = self
            .sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;
        Ok(Box::new(file))
    }

    async fn close(&self) -> Result<(), SftpError> {
        info!("Closing SFTP session for {}", self.label);
        self.sftp
            .close()
            .await
            .map_err(|e| SftpError::ProtocolError(e.to_string()))
    }
}
