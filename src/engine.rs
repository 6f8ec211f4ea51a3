//! Engine facade
//!
//! Wires the registry, cache, navigator and pipeline together and exposes
//! the command surface a UI bridge calls into.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{ConfigStorage, EngineConfig};
use crate::events::{EngineEvent, EventBus};
use crate::pane::{NavigateOutcome, Navigator, OpenAction, Pane, Side};
use crate::session::{ConnectTarget, Connector, SessionRegistry, SshConnector};
use crate::sftp::{DirectoryCache, SftpError};
use crate::ssh::SshDialer;
use crate::transfer::{ConflictResolution, FileConflict, TransferPipeline, TransferTask};

pub struct Engine {
    config: Arc<EngineConfig>,
    events: EventBus,
    registry: Arc<SessionRegistry>,
    cache: Arc<DirectoryCache>,
    navigator: Arc<Navigator>,
    pipeline: Arc<TransferPipeline>,
}

impl Engine {
    /// Engine that reaches remote hosts over SSH
    pub fn new(config: EngineConfig) -> Self {
        let dialer = SshDialer::new(config.connect_timeout(), config.keepalive());
        Self::with_connector(config, Arc::new(SshConnector::new(dialer)))
    }

    pub fn with_connector(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(SessionRegistry::new(connector));
        let cache = Arc::new(DirectoryCache::new(config.cache_ttl()));
        let navigator = Arc::new(Navigator::new(
            registry.clone(),
            cache.clone(),
            events.clone(),
            config.clone(),
        ));
        let pipeline = Arc::new(TransferPipeline::new(
            registry.clone(),
            navigator.clone(),
            cache.clone(),
            events.clone(),
            config.clone(),
        ));

        Self {
            config,
            events,
            registry,
            cache,
            navigator,
            pipeline,
        }
    }

    /// Engine configured from the settings file, defaults when absent
    pub async fn from_storage(storage: &ConfigStorage) -> Self {
        let config = match storage.load().await {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load engine config: {}, using defaults", e);
                EngineConfig::default()
            }
        };
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    pub fn pipeline(&self) -> &Arc<TransferPipeline> {
        &self.pipeline
    }

    // ── Panes ─────────────────────────────────────────────────────────────

    pub async fn connect(&self, side: Side, target: ConnectTarget) -> Result<NavigateOutcome, SftpError> {
        self.navigator.connect(side, target).await
    }

    pub async fn disconnect(&self, side: Side) {
        self.navigator.disconnect(side).await
    }

    pub async fn navigate(&self, side: Side, path: &str) -> Result<NavigateOutcome, SftpError> {
        self.navigator.navigate(side, path, false).await
    }

    pub async fn refresh(&self, side: Side) -> Result<NavigateOutcome, SftpError> {
        self.navigator.refresh(side).await
    }

    pub fn pane(&self, side: Side) -> Pane {
        self.navigator.active_pane(side)
    }

    /// Activate an entry. A file that should transfer is queued to the
    /// other side before returning.
    pub async fn open_entry(&self, side: Side, name: &str) -> Result<OpenAction, SftpError> {
        let action = self.navigator.open_entry(side, name).await?;
        if action == OpenAction::Transfer {
            self.start_transfer(vec![name.to_string()], side, side.opposite())
                .await?;
        }
        Ok(action)
    }

    // ── Transfers ─────────────────────────────────────────────────────────

    /// Queue a batch and run it in the background; returns the task ids
    pub async fn start_transfer(&self, names: Vec<String>, from: Side, to: Side) -> Result<Vec<String>, SftpError> {
        let ids = self.pipeline.enqueue(&names, from, to).await?;
        let pipeline = self.pipeline.clone();
        let batch = ids.clone();
        tokio::spawn(async move {
            pipeline.run_batch(&batch).await;
        });
        Ok(ids)
    }

    /// Send the current selection of `from` to the other side
    pub async fn transfer_selection(&self, from: Side) -> Result<Vec<String>, SftpError> {
        let names = self.navigator.selection(from);
        if names.is_empty() {
            return Err(SftpError::InvalidOperation("Nothing selected".into()));
        }
        self.start_transfer(names, from, from.opposite()).await
    }

    pub fn cancel_transfer(&self, id: &str) -> Result<(), SftpError> {
        self.pipeline.cancel_transfer(id)
    }

    pub async fn retry_transfer(&self, id: &str) -> Result<(), SftpError> {
        self.pipeline.retry_transfer(id).await
    }

    pub async fn resolve_conflict(&self, id: &str, resolution: ConflictResolution) -> Result<(), SftpError> {
        self.pipeline.resolve_conflict(id, resolution).await
    }

    pub fn transfers(&self) -> Vec<TransferTask> {
        self.pipeline.tasks()
    }

    pub fn conflicts(&self) -> Vec<FileConflict> {
        self.pipeline.conflicts()
    }

    pub fn active_transfer_count(&self) -> usize {
        self.pipeline.active_count()
    }

    /// Cancel transfers and close every session
    pub async fn shutdown(&self) {
        info!("Shutting down engine");
        self.pipeline.cancel_all();
        self.navigator.shutdown().await;
        self.registry.close_all().await;
        self.cache.clear();
    }
}
