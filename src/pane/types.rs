//! Pane and connection state

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::session::{ConnectTarget, ConnectionKind};
use crate::sftp::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub kind: ConnectionKind,
    pub label: String,
    pub status: ConnectionStatus,
    pub current_path: String,
    pub home_dir: String,
    pub last_error: Option<String>,
    /// Host descriptor reused on reconnect; holds credentials, never serialized
    #[serde(skip)]
    pub target: ConnectTarget,
}

impl Connection {
    pub fn new(target: ConnectTarget) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: target.kind(),
            label: target.label(),
            status: ConnectionStatus::Connecting,
            current_path: String::new(),
            home_dir: String::new(),
            last_error: None,
            target,
        }
    }
}

/// One tab on a side
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pane {
    pub id: String,
    pub connection: Option<Connection>,
    pub entries: Vec<FileEntry>,
    pub loading: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
    pub selection: BTreeSet<String>,
    pub filter_text: String,
}

impl Pane {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connection: None,
            entries: Vec::new(),
            loading: false,
            reconnecting: false,
            error: None,
            selection: BTreeSet::new(),
            filter_text: String::new(),
        }
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.id.as_str())
    }

    pub fn entry(&self, name: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries that pass the filter, in listing order
    pub fn visible_entries(&self) -> Vec<FileEntry> {
        self.entries
            .iter()
            .filter(|e| super::filter::matches_filter(&e.name, &self.filter_text))
            .cloned()
            .collect()
    }

    /// Drop listing and transient state, keeping tab identity
    pub(crate) fn clear_listing(&mut self) {
        self.entries.clear();
        self.selection.clear();
        self.loading = false;
        self.reconnecting = false;
    }
}

impl Default for Pane {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a navigation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigateOutcome {
    /// The listing was applied to the pane
    Applied,
    /// A newer navigation was issued on the same side; the result was dropped
    Stale,
    /// The session died; the pane is reconnecting or disconnected
    SessionLost,
}

/// What activating an entry asks the caller to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "value", rename_all = "camelCase")]
pub enum OpenAction {
    Navigated(NavigateOutcome),
    /// Transfer the entry to the other side
    Transfer,
    /// Open locally with the associated application, or the system default
    OpenWith(Option<String>),
}
