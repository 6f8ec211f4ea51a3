//! Transfer task data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pane::Side;
use crate::session::ConnectionKind;
use crate::sftp::PathStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Upload,
    Download,
    RemoteToRemote,
}

impl TransferDirection {
    /// `None` for local → local, which is not a transfer
    pub fn between(from: ConnectionKind, to: ConnectionKind) -> Option<Self> {
        match (from, to) {
            (ConnectionKind::Local, ConnectionKind::Remote) => Some(TransferDirection::Upload),
            (ConnectionKind::Remote, ConnectionKind::Local) => Some(TransferDirection::Download),
            (ConnectionKind::Remote, ConnectionKind::Remote) => Some(TransferDirection::RemoteToRemote),
            (ConnectionKind::Local, ConnectionKind::Local) => None,
        }
    }

    pub fn source_style(self) -> PathStyle {
        match self {
            TransferDirection::Upload => PathStyle::Local,
            TransferDirection::Download | TransferDirection::RemoteToRemote => PathStyle::Remote,
        }
    }

    pub fn target_style(self) -> PathStyle {
        match self {
            TransferDirection::Download => PathStyle::Local,
            TransferDirection::Upload | TransferDirection::RemoteToRemote => PathStyle::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Queued, or parked on a conflict
    Pending,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: String,
    pub file_name: String,
    pub source_path: String,
    pub target_path: String,
    pub source_connection_id: String,
    pub target_connection_id: String,
    pub source_side: Side,
    pub target_side: Side,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes per second
    pub speed: u64,
    pub is_directory: bool,
    pub parent_task_id: Option<String>,
    pub skip_conflict_check: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferTask {
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConflict {
    pub transfer_id: String,
    pub file_name: String,
    pub source_path: String,
    pub target_path: String,
    pub existing_size: u64,
    pub existing_modified_at: Option<DateTime<Utc>>,
    pub new_size: u64,
    pub new_modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Replace,
    Skip,
    Duplicate,
}

/// Status a directory task takes from its children.
///
/// Failed wins over everything; a parked child keeps the parent parked;
/// skipped (cancelled) children count as done.
pub fn reconcile_status(children: &[TransferStatus]) -> TransferStatus {
    if children.contains(&TransferStatus::Failed) {
        TransferStatus::Failed
    } else if children.contains(&TransferStatus::Transferring) {
        TransferStatus::Transferring
    } else if children.contains(&TransferStatus::Pending) {
        TransferStatus::Pending
    } else {
        TransferStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransferStatus::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(
            TransferDirection::between(ConnectionKind::Local, ConnectionKind::Remote),
            Some(TransferDirection::Upload)
        );
        assert_eq!(
            TransferDirection::between(ConnectionKind::Remote, ConnectionKind::Remote),
            Some(TransferDirection::RemoteToRemote)
        );
        assert_eq!(TransferDirection::between(ConnectionKind::Local, ConnectionKind::Local), None);
        assert_eq!(TransferDirection::Download.target_style(), PathStyle::Local);
    }

    #[test]
    fn test_reconcile_status() {
        assert_eq!(reconcile_status(&[]), Completed);
        assert_eq!(reconcile_status(&[Completed, Cancelled]), Completed);
        assert_eq!(reconcile_status(&[Completed, Pending]), Pending);
        assert_eq!(reconcile_status(&[Pending, Failed]), Failed);
        assert_eq!(reconcile_status(&[Completed, Transferring]), Transferring);
    }
}
