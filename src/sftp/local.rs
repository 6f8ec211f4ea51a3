//! Local filesystem backend

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use super::backend::{BoxedReader, BoxedWriter, FileBackend};
use super::error::SftpError;
use super::path_utils::PathStyle;
use super::types::{timestamp_from_unix, EntryKind, FileEntry};

#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn map_io_error(err: std::io::Error, path: &str) -> SftpError {
    match err.kind() {
        ErrorKind::NotFound => SftpError::FileNotFound(path.to_string()),
        ErrorKind::PermissionDenied => SftpError::PermissionDenied(path.to_string()),
        ErrorKind::AlreadyExists => SftpError::AlreadyExists(path.to_string()),
        _ => SftpError::IoError(err),
    }
}

fn kind_of(meta: &Metadata) -> EntryKind {
    let ft = meta.file_type();
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

#[cfg(unix)]
fn permissions_of(meta: &Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions_of(_meta: &Metadata) -> Option<String> {
    None
}

/// Build an entry from `symlink_metadata`, following links once for their
/// target kind. A link to a file reports the file's size.
async fn entry_from(name: String, full_path: &Path, meta: Metadata) -> FileEntry {
    let kind = kind_of(&meta);
    let target = if kind == EntryKind::Symlink {
        tokio::fs::metadata(full_path).await.ok()
    } else {
        None
    };
    let symlink_target_kind = target.as_ref().map(kind_of);
    let size = match &target {
        Some(target) if target.is_file() => target.len(),
        _ => meta.len(),
    };
    let modified_at = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| timestamp_from_unix(d.as_secs() as i64));

    FileEntry {
        name,
        kind,
        symlink_target_kind,
        size,
        modified_at,
        permissions: permissions_of(&meta),
    }
}

#[async_trait]
impl FileBackend for LocalBackend {
    fn path_style(&self) -> PathStyle {
        PathStyle::Local
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        debug!("Listing local directory: {}", path);
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| map_io_error(e, path))?;

        let mut entries = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await.map_err(|e| map_io_error(e, path))? {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            let full_path = dir_entry.path();
            // Entries that vanish mid-listing are skipped
            let Ok(meta) = tokio::fs::symlink_metadata(&full_path).await else {
                continue;
            };
            entries.push(entry_from(name, &full_path, meta).await);
        }
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| map_io_error(e, path))?;
        let p = Path::new(path);
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        Ok(entry_from(name, p, meta).await)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        info!("Creating local directory: {}", path);
        tokio::fs::create_dir(path)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        info!("Renaming {} to {}", from, to);
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| map_io_error(e, from))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
                .await
                .map_err(|e| map_io_error(e, path))
        }

        #[cfg(not(unix))]
        {
            let _ = mode;
            Err(SftpError::Unsupported(format!("chmod on {}", path)))
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        tokio::fs::read(path).await.map_err(|e| map_io_error(e, path))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        tokio::fs::write(path, data)
            .await
            .map_err(|e| map_io_error(e, path))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn open_reader(&self, path: &str) -> Result<BoxedReader, SftpError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn open_writer(&self, path: &str) -> Result<BoxedWriter, SftpError> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn path_str(p: &Path) -> String {
        p.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_list_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let backend = LocalBackend::new();
        let mut entries = backend.list_dir(&path_str(dir.path())).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].kind, EntryKind::Directory);

        let stat = backend.stat(&path_str(&dir.path().join("a.txt"))).await.unwrap();
        assert_eq!(stat.name, "a.txt");
        assert!(stat.modified_at.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_to_file_reports_target_size() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("big.bin");
        std::fs::write(&target, vec![1u8; 4096]).unwrap();
        let link = dir.path().join("link.bin");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let backend = LocalBackend::new();
        let stat = backend.stat(&path_str(&link)).await.unwrap();
        assert_eq!(stat.kind, EntryKind::Symlink);
        assert_eq!(stat.symlink_target_kind, Some(EntryKind::File));
        assert_eq!(stat.size, 4096);

        let entries = backend.list_dir(&path_str(dir.path())).await.unwrap();
        assert!(entries.iter().all(|e| e.size == 4096));
    }

    #[tokio::test]
    async fn test_missing_path_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path_str(&dir.path().join("nope"));
        let backend = LocalBackend::new();
        assert!(matches!(backend.stat(&missing).await, Err(SftpError::FileNotFound(_))));
        assert!(backend.try_stat(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("sub/b.txt"), b"b").unwrap();

        let removed = LocalBackend::new()
            .remove_recursive(&path_str(&root))
            .await
            .unwrap();
        assert_eq!(removed, 4);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_streaming_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_str(&dir.path().join("blob.bin"));
        let backend = LocalBackend::new();

        let mut writer = backend.open_writer(&path).await.unwrap();
        writer.write_all(b"streamed").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = backend.open_reader(&path).await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "streamed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chmod() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_str(&dir.path().join("script.sh"));
        let backend = LocalBackend::new();
        backend.write_file(&path, b"#!/bin/sh\n").await.unwrap();
        backend.chmod(&path, 0o750).await.unwrap();
        assert_eq!(backend.stat(&path).await.unwrap().permissions.as_deref(), Some("750"));
    }
}
