//! File session error types

use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("SFTP protocol error: {0}")]
    ProtocolError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Transport message fragments that mean the session underneath is gone
const SESSION_ERROR_MARKERS: &[&str] = &[
    "session not found",
    "not connected",
    "channel closed",
    "connection closed",
    "session closed",
    "connection reset",
    "broken pipe",
    "disconnected",
];

impl SftpError {
    /// Whether this error means the underlying session died.
    ///
    /// Matches on variant first, then on the transport's message text since
    /// russh-sftp reports most transport failures as plain strings.
    pub fn is_session_error(&self) -> bool {
        match self {
            SftpError::SessionNotFound(_) | SftpError::SessionLost(_) => true,
            SftpError::Ssh(SshError::Disconnected) => true,
            SftpError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            SftpError::FileNotFound(_)
            | SftpError::PermissionDenied(_)
            | SftpError::AlreadyExists(_)
            | SftpError::TransferCancelled => false,
            other => {
                let msg = other.to_string().to_lowercase();
                SESSION_ERROR_MARKERS.iter().any(|m| msg.contains(m))
            }
        }
    }

    /// Map a russh-sftp error for `path` onto the closest variant
    pub fn from_sftp(err: russh_sftp::client::error::Error, path: &str) -> Self {
        let err_str = err.to_string();
        let lower = err_str.to_lowercase();
        if lower.contains("no such file") || lower.contains("not found") {
            SftpError::FileNotFound(path.to_string())
        } else if lower.contains("permission denied") {
            SftpError::PermissionDenied(path.to_string())
        } else {
            SftpError::ProtocolError(err_str)
        }
    }
}

impl serde::Serialize for SftpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
