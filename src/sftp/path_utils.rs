//! Path helpers for both sides of a transfer
//!
//! Remote paths always use `/`. Local paths go through `PathBuf` so Windows
//! drive letters and UNC prefixes survive joins. Everything here is pure.

use std::path::{Path, PathBuf};

/// Which flavour of path a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Local,
    Remote,
}

/// Check if a path is absolute (cross-platform).
///
/// Handles Unix paths, Windows drive letters (`C:\`, `D:/`) and UNC paths
/// (`\\server\share`, `\\?\C:\long`).
pub fn is_absolute_local_path(path: &str) -> bool {
    if Path::new(path).is_absolute() || path.starts_with('/') {
        return true;
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return true;
    }

    path.starts_with("\\\\") || path.starts_with("//")
}

pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join local path components using the platform separator
pub fn join_local_path(base: &str, component: &str) -> String {
    let mut path = PathBuf::from(base);
    path.push(component);
    path.to_string_lossy().to_string()
}

/// Join remote path components with `/`
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

pub fn join_path(style: PathStyle, base: &str, component: &str) -> String {
    match style {
        PathStyle::Local => join_local_path(base, component),
        PathStyle::Remote => join_remote_path(base, component),
    }
}

/// Parent directory; the root is its own parent
pub fn parent_path(style: PathStyle, path: &str) -> String {
    match style {
        PathStyle::Remote => {
            let trimmed = path.trim_end_matches('/');
            match trimmed.rfind('/') {
                Some(0) | None => "/".to_string(),
                Some(idx) => trimmed[..idx].to_string(),
            }
        }
        PathStyle::Local => match Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().to_string(),
            _ => path.to_string(),
        },
    }
}

/// Final path component
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
}

/// `"photo.png"` → `"photo (copy).png"`.
///
/// Names without an extension, and dotfiles, get the suffix appended.
pub fn duplicate_name(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => {
            format!("{} (copy){}", &name[..idx], &name[idx..])
        }
        _ => format!("{} (copy)", name),
    }
}

/// Sibling path of `path` carrying [`duplicate_name`] of its file name
pub fn duplicate_path(style: PathStyle, path: &str) -> String {
    let parent = parent_path(style, path);
    join_path(style, &parent, &duplicate_name(file_name(path)))
}
