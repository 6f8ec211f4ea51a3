//! Session types

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sftp::{FileBackend, PathStyle};
use crate::ssh::{HostDescriptor, LiveHop};

/// What a pane connects to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectTarget {
    Local,
    Remote(HostDescriptor),
}

impl ConnectTarget {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            ConnectTarget::Local => ConnectionKind::Local,
            ConnectTarget::Remote(_) => ConnectionKind::Remote,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ConnectTarget::Local => "Local".to_string(),
            ConnectTarget::Remote(host) => host.display_label(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Local,
    Remote,
}

impl ConnectionKind {
    pub fn path_style(self) -> PathStyle {
        match self {
            ConnectionKind::Local => PathStyle::Local,
            ConnectionKind::Remote => PathStyle::Remote,
        }
    }
}

/// A live remote link as produced by a connector
pub struct RemoteLink {
    pub backend: Arc<dyn FileBackend>,
    /// Order: [hop1, ..., hopN, target]
    pub sessions: Vec<LiveHop>,
}

/// Result of opening a connection
#[derive(Clone)]
pub struct OpenedSession {
    pub backend: Arc<dyn FileBackend>,
    pub home_dir: String,
}

impl std::fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSession")
            .field("home_dir", &self.home_dir)
            .finish_non_exhaustive()
    }
}
