//! Session Registry
//!
//! Owns every live protocol client together with the SSH sessions that carry
//! it, keyed by connection id. Entries are opened and torn down as a unit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::types::{ConnectTarget, OpenedSession, RemoteLink};
use crate::sftp::{FileBackend, LocalBackend, RemoteBackend, SftpError};
use crate::ssh::{
    connect_chain, connect_through_proxy, teardown_hops, HostDescriptor, LiveHop, SshDialer,
};

/// Opens remote links
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostDescriptor) -> Result<RemoteLink, SftpError>;
}

/// russh-backed connector: chain when hops exist, proxy when only a proxy
/// exists, direct TCP otherwise
pub struct SshConnector {
    dialer: SshDialer,
}

impl SshConnector {
    pub fn new(dialer: SshDialer) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<RemoteLink, SftpError> {
        let dialer = self.dialer.with_timeout(Duration::from_secs(host.timeout_secs));

        let (via, mut sessions) = if !host.hops.is_empty() {
            let chain = connect_chain(
                &dialer,
                &host.hops,
                &host.hostname,
                host.port,
                host.proxy.as_ref(),
            )
            .await?;
            (Some(chain.stream), chain.hops)
        } else if let Some(proxy) = &host.proxy {
            let stream = connect_through_proxy(proxy, &host.hostname, host.port).await?;
            (Some(stream), Vec::new())
        } else {
            (None, Vec::new())
        };

        let target = match dialer.dial_ssh(&host.as_hop(), via).await {
            Ok(target) => target,
            Err(e) => {
                teardown_hops(sessions).await;
                return Err(e.into());
            }
        };

        let backend = RemoteBackend::open(target.controller(), host.display_label()).await;
        sessions.push(Box::new(target));

        match backend {
            Ok(backend) => Ok(RemoteLink {
                backend: Arc::new(backend),
                sessions,
            }),
            Err(e) => {
                teardown_hops(sessions).await;
                Err(e)
            }
        }
    }
}

/// Home directory candidates, most specific first
pub fn home_candidates(username: &str) -> Vec<String> {
    let mut candidates = Vec::with_capacity(3);
    if username == "root" {
        candidates.push("/root".to_string());
    } else {
        candidates.push(format!("/home/{}", username));
        candidates.push("/root".to_string());
    }
    candidates.push("/".to_string());
    candidates
}

/// First candidate that stats as a directory; `/` otherwise
pub async fn probe_home_dir(backend: &dyn FileBackend, username: &str) -> String {
    for candidate in home_candidates(username) {
        match backend.stat(&candidate).await {
            Ok(entry) if entry.is_dir_like() => {
                debug!("Home directory for {}: {}", username, candidate);
                return candidate;
            }
            Ok(_) => debug!("Home candidate {} is not a directory", candidate),
            Err(e) => debug!("Home candidate {} unavailable: {}", candidate, e),
        }
    }
    "/".to_string()
}

fn local_home_dir() -> String {
    dirs::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "/".to_string())
}

struct SessionEntry {
    backend: Arc<dyn FileBackend>,
    /// Order: [hop1, ..., hopN, target]
    sessions: Vec<LiveHop>,
    label: String,
}

pub struct SessionRegistry {
    entries: DashMap<String, SessionEntry>,
    connector: Arc<dyn Connector>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            entries: DashMap::new(),
            connector,
        }
    }

    /// Open a session for `connection_id`, replacing any live one
    pub async fn open(&self, connection_id: &str, target: &ConnectTarget) -> Result<OpenedSession, SftpError> {
        if self.entries.contains_key(connection_id) {
            info!("Connection {} already open, closing previous session", connection_id);
            self.close(connection_id).await;
        }

        let (entry, home_dir) = match target {
            ConnectTarget::Local => {
                let backend: Arc<dyn FileBackend> = Arc::new(LocalBackend::new());
                let entry = SessionEntry {
                    backend,
                    sessions: Vec::new(),
                    label: "local".to_string(),
                };
                (entry, local_home_dir())
            }
            ConnectTarget::Remote(host) => {
                info!("Opening session {} to {}", connection_id, host.display_label());
                let link = self.connector.connect(host).await?;
                let home_dir = probe_home_dir(link.backend.as_ref(), &host.username).await;
                let entry = SessionEntry {
                    backend: link.backend,
                    sessions: link.sessions,
                    label: host.display_label(),
                };
                (entry, home_dir)
            }
        };

        let opened = OpenedSession {
            backend: entry.backend.clone(),
            home_dir,
        };
        self.entries.insert(connection_id.to_string(), entry);
        info!("Session {} open, home {}", connection_id, opened.home_dir);
        Ok(opened)
    }

    pub fn get(&self, connection_id: &str) -> Result<Arc<dyn FileBackend>, SftpError> {
        self.entries
            .get(connection_id)
            .map(|e| e.backend.clone())
            .ok_or_else(|| SftpError::SessionNotFound(connection_id.to_string()))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.entries.contains_key(connection_id)
    }

    /// End the protocol client, then every session in reverse order.
    ///
    /// Never fails; teardown errors are logged.
    pub async fn close(&self, connection_id: &str) {
        let Some((_, entry)) = self.entries.remove(connection_id) else {
            debug!("Close of unknown connection {}", connection_id);
            return;
        };

        info!("Closing session {} ({})", connection_id, entry.label);
        if let Err(e) = entry.backend.close().await {
            warn!("Closing file session for {} failed: {}", entry.label, e);
        }
        teardown_hops(entry.sessions).await;
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
