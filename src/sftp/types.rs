//! File listing data types

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One directory entry, an immutable snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name (not full path)
    pub name: String,
    pub kind: EntryKind,
    /// What a symlink points at, when it could be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target_kind: Option<EntryKind>,
    /// File size in bytes
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Octal permission string, e.g. "755"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

impl FileEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            symlink_target_kind: None,
            size,
            modified_at: None,
            permissions: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            symlink_target_kind: None,
            size: 0,
            modified_at: None,
            permissions: None,
        }
    }

    /// A directory, or a symlink that resolves to one
    pub fn is_dir_like(&self) -> bool {
        self.kind == EntryKind::Directory
            || (self.kind == EntryKind::Symlink
                && self.symlink_target_kind == Some(EntryKind::Directory))
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// Unix seconds to a UTC timestamp; zero and out-of-range values are absent
pub fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Listing order: directories first, then case-insensitive name
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        let a_is_dir = a.is_dir_like();
        let b_is_dir = b.is_dir_like();
        if a_is_dir != b_is_dir {
            return b_is_dir.cmp(&a_is_dir);
        }
        match a.name.to_lowercase().cmp(&b.name.to_lowercase()) {
            Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_directories_first_case_insensitive() {
        let mut entries = vec![
            FileEntry::file("beta.txt", 1),
            FileEntry::directory("zeta"),
            FileEntry::file("Alpha.txt", 1),
            FileEntry::directory("Docs"),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Docs", "zeta", "Alpha.txt", "beta.txt"]);
    }

    #[test]
    fn test_symlink_to_directory_is_dir_like() {
        let mut link = FileEntry::file("current", 0);
        link.kind = EntryKind::Symlink;
        assert!(!link.is_dir_like());
        link.symlink_target_kind = Some(EntryKind::Directory);
        assert!(link.is_dir_like());
    }

    #[test]
    fn test_extension() {
        assert_eq!(FileEntry::file("photo.PNG", 0).extension().as_deref(), Some("png"));
        assert_eq!(FileEntry::file(".bashrc", 0).extension(), None);
        assert_eq!(FileEntry::file("Makefile", 0).extension(), None);
    }

    #[test]
    fn test_timestamp_from_unix() {
        assert!(timestamp_from_unix(0).is_none());
        assert_eq!(timestamp_from_unix(1_700_000_000).unwrap().timestamp(), 1_700_000_000);
    }
}
