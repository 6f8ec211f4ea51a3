//! File backend abstraction
//!
//! A pane talks to one backend: the local filesystem or an SFTP session. The
//! navigator and the transfer pipeline only see this trait.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::SftpError;
use super::path_utils::{join_path, PathStyle};
use super::types::FileEntry;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait FileBackend: Send + Sync {
    fn path_style(&self) -> PathStyle;

    /// Directory listing without `.` and `..`, unsorted
    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError>;

    /// `FileNotFound` when nothing exists at `path`
    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError>;

    async fn create_dir(&self, path: &str) -> Result<(), SftpError>;

    async fn remove_file(&self, path: &str) -> Result<(), SftpError>;

    /// Remove an empty directory
    async fn remove_dir(&self, path: &str) -> Result<(), SftpError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), SftpError>;

    /// Whole-file read
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SftpError>;

    /// Whole-file write, truncating any existing file
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError>;

    /// Whether `open_reader` / `open_writer` are available
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn open_reader(&self, path: &str) -> Result<BoxedReader, SftpError> {
        Err(SftpError::Unsupported(format!("streaming read of {}", path)))
    }

    async fn open_writer(&self, path: &str) -> Result<BoxedWriter, SftpError> {
        Err(SftpError::Unsupported(format!("streaming write of {}", path)))
    }

    /// End the underlying protocol session
    async fn close(&self) -> Result<(), SftpError> {
        Ok(())
    }

    /// `stat` that turns `FileNotFound` into `None`
    async fn try_stat(&self, path: &str) -> Result<Option<FileEntry>, SftpError> {
        match self.stat(path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(SftpError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a file, or a directory with everything under it.
    ///
    /// Returns the number of removed entries.
    async fn remove_recursive(&self, path: &str) -> Result<u64, SftpError> {
        let entry = self.stat(path).await?;
        if entry.kind != super::types::EntryKind::Directory {
            self.remove_file(path).await?;
            return Ok(1);
        }

        let mut removed = 0u64;
        for child in self.list_dir(path).await? {
            let child_path = join_path(self.path_style(), path, &child.name);
            removed += Box::pin(self.remove_recursive(&child_path)).await?;
        }
        self.remove_dir(path).await?;
        Ok(removed + 1)
    }
}
