//! Pane/Tab Navigator
//!
//! Each side (left/right) holds an ordered list of tabs. Navigation on a side
//! is last-request-wins: every request draws the next number from the side's
//! sequencer, and a listing is applied only if its number is still the
//! latest when it resolves.
//!
//! # Session loss
//!
//! A listing or file operation that fails with a session error invalidates
//! the connection's cache and closes its registry entry. A pane that still
//! shows entries keeps them and schedules one reconnect after a fixed delay;
//! an empty pane drops to `Disconnected` and waits for the user.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::types::{Connection, ConnectionStatus, NavigateOutcome, OpenAction, Pane, Side};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::session::{ConnectTarget, ConnectionKind, SessionRegistry, SideSequencer};
use crate::sftp::path_utils::{join_path, parent_path};
use crate::sftp::{sort_entries, DirectoryCache, FileBackend, FileEntry, SftpError};

struct SideState {
    panes: Vec<Pane>,
    active: String,
    /// Pane that received the latest sequence number
    last_navigated: Option<String>,
}

impl SideState {
    fn new() -> Self {
        let pane = Pane::new();
        Self {
            active: pane.id.clone(),
            panes: vec![pane],
            last_navigated: None,
        }
    }

    fn pane_mut(&mut self, pane_id: &str) -> Option<&mut Pane> {
        self.panes.iter_mut().find(|p| p.id == pane_id)
    }

    fn active_pane(&self) -> &Pane {
        self.panes
            .iter()
            .find(|p| p.id == self.active)
            .unwrap_or(&self.panes[0])
    }
}

struct Sides {
    left: SideState,
    right: SideState,
}

impl Sides {
    fn get(&self, side: Side) -> &SideState {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn get_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// The connected pane a command acts on
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub pane_id: String,
    pub connection_id: String,
    pub kind: ConnectionKind,
    pub current_path: String,
}

impl Endpoint {
    pub fn join(&self, name: &str) -> String {
        join_path(self.kind.path_style(), &self.current_path, name)
    }
}

pub struct Navigator {
    sides: RwLock<Sides>,
    sequencer: SideSequencer,
    registry: Arc<SessionRegistry>,
    cache: Arc<DirectoryCache>,
    events: EventBus,
    config: Arc<EngineConfig>,
    /// Panes with a reconnect scheduled or running
    reconnects: Mutex<HashSet<String>>,
}

impl Navigator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        cache: Arc<DirectoryCache>,
        events: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            sides: RwLock::new(Sides {
                left: SideState::new(),
                right: SideState::new(),
            }),
            sequencer: SideSequencer::new(),
            registry,
            cache,
            events,
            config,
            reconnects: Mutex::new(HashSet::new()),
        }
    }

    // ── Snapshots ──────────────────────────────────────────────────────────

    pub fn active_pane(&self, side: Side) -> Pane {
        self.sides.read().get(side).active_pane().clone()
    }

    pub fn tabs(&self, side: Side) -> Vec<Pane> {
        self.sides.read().get(side).panes.clone()
    }

    pub fn pane(&self, side: Side, pane_id: &str) -> Option<Pane> {
        self.sides
            .read()
            .get(side)
            .panes
            .iter()
            .find(|p| p.id == pane_id)
            .cloned()
    }

    pub fn entry(&self, side: Side, name: &str) -> Option<FileEntry> {
        self.sides.read().get(side).active_pane().entry(name).cloned()
    }

    pub fn visible_entries(&self, side: Side) -> Vec<FileEntry> {
        self.sides.read().get(side).active_pane().visible_entries()
    }

    pub fn selection(&self, side: Side) -> Vec<String> {
        self.sides
            .read()
            .get(side)
            .active_pane()
            .selection
            .iter()
            .cloned()
            .collect()
    }

    /// The active pane of `side`, which must be connected
    pub fn endpoint(&self, side: Side) -> Result<Endpoint, SftpError> {
        let sides = self.sides.read();
        let pane = sides.get(side).active_pane();
        match &pane.connection {
            Some(conn) if conn.status == ConnectionStatus::Connected || pane.reconnecting => Ok(Endpoint {
                pane_id: pane.id.clone(),
                connection_id: conn.id.clone(),
                kind: conn.kind,
                current_path: conn.current_path.clone(),
            }),
            Some(conn) => Err(SftpError::InvalidOperation(format!(
                "{:?} pane is not connected ({:?})",
                side, conn.status
            ))),
            None => Err(SftpError::InvalidOperation(format!("{:?} pane has no connection", side))),
        }
    }

    // ── Internal state helpers ─────────────────────────────────────────────

    /// Mutate one pane and announce the result
    fn update_pane<R>(&self, side: Side, pane_id: &str, f: impl FnOnce(&mut Pane) -> R) -> Option<R> {
        let (result, snapshot) = {
            let mut sides = self.sides.write();
            let pane = sides.get_mut(side).pane_mut(pane_id)?;
            let result = f(pane);
            (result, pane.clone())
        };
        self.events.emit(EngineEvent::PaneChanged { side, pane: snapshot });
        Some(result)
    }

    fn update_active<R>(&self, side: Side, f: impl FnOnce(&mut Pane) -> R) -> R {
        let (result, snapshot) = {
            let mut sides = self.sides.write();
            let state = sides.get_mut(side);
            let active = state.active.clone();
            let idx = state.panes.iter().position(|p| p.id == active).unwrap_or(0);
            let pane = &mut state.panes[idx];
            let result = f(pane);
            (result, pane.clone())
        };
        self.events.emit(EngineEvent::PaneChanged { side, pane: snapshot });
        result
    }

    fn issue_sequence(&self, side: Side, pane_id: &str) -> u64 {
        let mut sides = self.sides.write();
        sides.get_mut(side).last_navigated = Some(pane_id.to_string());
        self.sequencer.next(side)
    }

    async fn release_connection(&self, connection_id: &str) {
        self.cache.invalidate(connection_id);
        self.registry.close(connection_id).await;
    }

    // ── Connection lifecycle ───────────────────────────────────────────────

    /// Connect the active pane of `side`, replacing its current connection,
    /// then list the home directory.
    pub async fn connect(self: &Arc<Self>, side: Side, target: ConnectTarget) -> Result<NavigateOutcome, SftpError> {
        let connection = Connection::new(target.clone());
        let connection_id = connection.id.clone();
        info!("Connecting {:?} pane to {}", side, connection.label);

        let (pane_id, previous) = self.update_active(side, |pane| {
            let previous = pane.connection.take().map(|c| c.id);
            pane.clear_listing();
            pane.error = None;
            pane.loading = true;
            pane.connection = Some(connection);
            (pane.id.clone(), previous)
        });
        self.issue_sequence(side, &pane_id);
        if let Some(previous) = previous {
            self.release_connection(&previous).await;
        }

        match self.registry.open(&connection_id, &target).await {
            Ok(opened) => {
                let home = opened.home_dir.clone();
                let current = self
                    .update_pane(side, &pane_id, |pane| match pane.connection.as_mut() {
                        Some(conn) if conn.id == connection_id => {
                            conn.status = ConnectionStatus::Connected;
                            conn.home_dir = home.clone();
                            conn.current_path = home.clone();
                            conn.last_error = None;
                            true
                        }
                        _ => false,
                    })
                    .unwrap_or(false);

                if !current {
                    debug!("Pane moved on while connecting, dropping {}", connection_id);
                    self.registry.close(&connection_id).await;
                    return Ok(NavigateOutcome::Stale);
                }
                self.navigate_pane(side, &pane_id, &opened.home_dir, true).await
            }
            Err(e) => {
                warn!("Connect on {:?} pane failed: {}", side, e);
                let message = e.to_string();
                self.update_pane(side, &pane_id, |pane| {
                    if let Some(conn) = pane.connection.as_mut().filter(|c| c.id == connection_id) {
                        conn.status = ConnectionStatus::Error;
                        conn.last_error = Some(message.clone());
                        pane.loading = false;
                        pane.error = Some(message);
                    }
                });
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self, side: Side) {
        let (pane_id, previous) = self.update_active(side, |pane| {
            let previous = pane.connection.take().map(|c| c.id);
            pane.clear_listing();
            pane.error = None;
            (pane.id.clone(), previous)
        });
        self.issue_sequence(side, &pane_id);
        if let Some(connection_id) = previous {
            info!("Disconnecting {:?} pane ({})", side, connection_id);
            self.release_connection(&connection_id).await;
        }
    }

    // ── Navigation ────────────────────────────────────────────────────────

    pub async fn navigate(self: &Arc<Self>, side: Side, path: &str, force: bool) -> Result<NavigateOutcome, SftpError> {
        let endpoint = self.endpoint(side)?;
        self.navigate_pane(side, &endpoint.pane_id, path, force).await
    }

    pub async fn navigate_up(self: &Arc<Self>, side: Side) -> Result<NavigateOutcome, SftpError> {
        let endpoint = self.endpoint(side)?;
        let parent = parent_path(endpoint.kind.path_style(), &endpoint.current_path);
        self.navigate_pane(side, &endpoint.pane_id, &parent, false).await
    }

    pub async fn refresh(self: &Arc<Self>, side: Side) -> Result<NavigateOutcome, SftpError> {
        let endpoint = self.endpoint(side)?;
        self.navigate_pane(side, &endpoint.pane_id, &endpoint.current_path, true).await
    }

    /// Re-list `side` if its active pane shows `connection_id`
    pub async fn refresh_if_showing(self: &Arc<Self>, side: Side, connection_id: &str) {
        let Ok(endpoint) = self.endpoint(side) else {
            return;
        };
        if endpoint.connection_id != connection_id {
            return;
        }
        if let Err(e) = self
            .navigate_pane(side, &endpoint.pane_id, &endpoint.current_path, true)
            .await
        {
            warn!("Refresh of {:?} pane failed: {}", side, e);
        }
    }

    async fn navigate_pane(
        self: &Arc<Self>,
        side: Side,
        pane_id: &str,
        path: &str,
        force: bool,
    ) -> Result<NavigateOutcome, SftpError> {
        let seq = self.issue_sequence(side, pane_id);
        let connection_id = self
            .pane(side, pane_id)
            .and_then(|p| p.connection.map(|c| c.id))
            .ok_or_else(|| SftpError::InvalidOperation("pane has no connection".into()))?;

        if !force {
            if let Some(entries) = self.cache.get(&connection_id, path) {
                debug!("Cache hit for {}::{}", connection_id, path);
                return Ok(self.apply_listing(side, pane_id, &connection_id, seq, path, entries.to_vec()));
            }
        }

        self.update_pane(side, pane_id, |pane| pane.loading = true);

        let result = match self.registry.get(&connection_id) {
            Ok(backend) => backend.list_dir(path).await,
            Err(e) => Err(e),
        };

        if !self.sequencer.is_latest(side, seq) {
            debug!("Discarding stale listing of {} (seq {})", path, seq);
            self.settle_stale(side, pane_id);
            return Ok(NavigateOutcome::Stale);
        }

        match result {
            Ok(mut entries) => {
                sort_entries(&mut entries);
                self.cache.put(&connection_id, path, entries.clone());
                Ok(self.apply_listing(side, pane_id, &connection_id, seq, path, entries))
            }
            Err(e) if e.is_session_error() => {
                self.handle_session_loss(side, pane_id, &connection_id, &e).await;
                Ok(NavigateOutcome::SessionLost)
            }
            Err(e) => {
                warn!("Listing {} failed: {}", path, e);
                let message = e.to_string();
                self.update_pane(side, pane_id, |pane| {
                    pane.loading = false;
                    pane.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// A stale result leaves the pane alone unless no newer request targets it
    fn settle_stale(&self, side: Side, pane_id: &str) {
        let owned_elsewhere = {
            let sides = self.sides.read();
            sides.get(side).last_navigated.as_deref() != Some(pane_id)
        };
        if owned_elsewhere {
            self.update_pane(side, pane_id, |pane| pane.loading = false);
        }
    }

    fn apply_listing(
        &self,
        side: Side,
        pane_id: &str,
        connection_id: &str,
        seq: u64,
        path: &str,
        entries: Vec<FileEntry>,
    ) -> NavigateOutcome {
        let snapshot = {
            let mut sides = self.sides.write();
            if !self.sequencer.is_latest(side, seq) {
                return NavigateOutcome::Stale;
            }
            let Some(pane) = sides.get_mut(side).pane_mut(pane_id) else {
                return NavigateOutcome::Stale;
            };
            let Some(conn) = pane.connection.as_mut().filter(|c| c.id == connection_id) else {
                return NavigateOutcome::Stale;
            };

            if conn.current_path == path {
                pane.selection.retain(|name| entries.iter().any(|e| &e.name == name));
            } else {
                pane.selection.clear();
            }
            conn.current_path = path.to_string();
            conn.status = ConnectionStatus::Connected;
            conn.last_error = None;
            pane.entries = entries;
            pane.loading = false;
            pane.error = None;
            pane.clone()
        };
        self.events.emit(EngineEvent::PaneChanged { side, pane: snapshot });
        NavigateOutcome::Applied
    }

    // ── Session loss and reconnect ────────────────────────────────────────

    async fn handle_session_loss(self: &Arc<Self>, side: Side, pane_id: &str, connection_id: &str, err: &SftpError) {
        warn!("Session {} lost on {:?} pane: {}", connection_id, side, err);
        self.release_connection(connection_id).await;

        let message = err.to_string();
        let schedule = self
            .update_pane(side, pane_id, |pane| {
                let has_entries = !pane.entries.is_empty();
                let Some(conn) = pane.connection.as_mut().filter(|c| c.id == connection_id) else {
                    return false;
                };
                if has_entries {
                    conn.status = ConnectionStatus::Connecting;
                    pane.reconnecting = true;
                    pane.loading = false;
                    pane.error = Some(format!("Connection lost, reconnecting: {}", message));
                    true
                } else {
                    conn.status = ConnectionStatus::Disconnected;
                    conn.last_error = Some(message.clone());
                    pane.clear_listing();
                    pane.error = Some(format!("Connection lost: {}. Reconnect to continue.", message));
                    false
                }
            })
            .unwrap_or(false);

        if schedule {
            self.schedule_reconnect(side, pane_id.to_string());
        }
    }

    /// At most one reconnect in flight per pane
    fn schedule_reconnect(self: &Arc<Self>, side: Side, pane_id: String) {
        if !self.reconnects.lock().insert(pane_id.clone()) {
            debug!("Reconnect already in flight for pane {}", pane_id);
            return;
        }
        let delay = self.config.reconnect_delay();
        info!("Reconnecting pane {} in {:?}", pane_id, delay);

        let navigator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.reconnect_pane(side, &pane_id).await;
        });
    }

    async fn reconnect_pane(self: &Arc<Self>, side: Side, pane_id: &str) {
        let pending = self.pane(side, pane_id).and_then(|pane| {
            let conn = pane.connection?;
            pane.reconnecting
                .then(|| (conn.id, conn.target, conn.current_path, conn.home_dir))
        });
        let Some((connection_id, target, path, home)) = pending else {
            debug!("Pane {} no longer waiting for reconnect", pane_id);
            self.reconnects.lock().remove(pane_id);
            return;
        };

        let result = self.registry.open(&connection_id, &target).await;
        self.reconnects.lock().remove(pane_id);

        match result {
            Ok(opened) => {
                let resumed = self
                    .update_pane(side, pane_id, |pane| {
                        if !pane.reconnecting {
                            return false;
                        }
                        let Some(conn) = pane.connection.as_mut().filter(|c| c.id == connection_id) else {
                            return false;
                        };
                        conn.status = ConnectionStatus::Connected;
                        conn.home_dir = opened.home_dir.clone();
                        conn.last_error = None;
                        pane.reconnecting = false;
                        pane.error = None;
                        true
                    })
                    .unwrap_or(false);

                if !resumed {
                    self.registry.close(&connection_id).await;
                    return;
                }
                info!("Pane {} reconnected", pane_id);
                let path = if path.is_empty() { home } else { path };
                if let Err(e) = self.navigate_pane(side, pane_id, &path, true).await {
                    warn!("Re-listing {} after reconnect failed: {}", path, e);
                }
            }
            Err(e) => {
                warn!("Reconnect of pane {} failed: {}", pane_id, e);
                let message = e.to_string();
                self.update_pane(side, pane_id, |pane| {
                    if let Some(conn) = pane.connection.as_mut().filter(|c| c.id == connection_id) {
                        conn.status = ConnectionStatus::Error;
                        conn.last_error = Some(message.clone());
                        pane.clear_listing();
                        pane.error = Some(format!("Reconnect failed: {}", message));
                    }
                });
            }
        }
    }

    // ── Entries ───────────────────────────────────────────────────────────

    /// Activate an entry: directories are entered, files transfer or open
    pub async fn open_entry(self: &Arc<Self>, side: Side, name: &str) -> Result<OpenAction, SftpError> {
        let endpoint = self.endpoint(side)?;
        let entry = self
            .entry(side, name)
            .ok_or_else(|| SftpError::FileNotFound(endpoint.join(name)))?;

        if entry.is_dir_like() {
            let path = endpoint.join(name);
            let outcome = self.navigate_pane(side, &endpoint.pane_id, &path, false).await?;
            return Ok(OpenAction::Navigated(outcome));
        }

        let behavior = &self.config.open_behavior;
        if behavior.double_click_transfers {
            Ok(OpenAction::Transfer)
        } else {
            Ok(OpenAction::OpenWith(behavior.application_for(entry.extension().as_deref())))
        }
    }

    pub fn select(&self, side: Side, names: Vec<String>) {
        self.update_active(side, |pane| {
            pane.selection = names
                .into_iter()
                .filter(|n| pane.entries.iter().any(|e| &e.name == n))
                .collect();
        });
    }

    pub fn toggle_selection(&self, side: Side, name: &str) {
        self.update_active(side, |pane| {
            if !pane.selection.remove(name) && pane.entry(name).is_some() {
                pane.selection.insert(name.to_string());
            }
        });
    }

    /// Select every entry that passes the filter
    pub fn select_all(&self, side: Side) {
        self.update_active(side, |pane| {
            pane.selection = pane.visible_entries().into_iter().map(|e| e.name).collect();
        });
    }

    pub fn clear_selection(&self, side: Side) {
        self.update_active(side, |pane| pane.selection.clear());
    }

    pub fn set_filter(&self, side: Side, text: &str) {
        self.update_active(side, |pane| pane.filter_text = text.to_string());
    }

    // ── File operations ───────────────────────────────────────────────────

    fn backend(&self, endpoint: &Endpoint) -> Result<Arc<dyn FileBackend>, SftpError> {
        self.registry.get(&endpoint.connection_id)
    }

    /// Invalidate and re-list after a mutation; route session loss to the pane
    async fn finish_file_op<T>(
        self: &Arc<Self>,
        side: Side,
        endpoint: &Endpoint,
        result: Result<T, SftpError>,
    ) -> Result<T, SftpError> {
        match &result {
            Err(e) if e.is_session_error() => {
                self.handle_session_loss(side, &endpoint.pane_id, &endpoint.connection_id, e)
                    .await;
            }
            _ => {
                self.cache.invalidate(&endpoint.connection_id);
                if let Err(e) = self
                    .navigate_pane(side, &endpoint.pane_id, &endpoint.current_path, true)
                    .await
                {
                    warn!("Refresh after file operation failed: {}", e);
                }
            }
        }
        result
    }

    pub async fn create_directory(self: &Arc<Self>, side: Side, name: &str) -> Result<(), SftpError> {
        let endpoint = self.endpoint(side)?;
        let path = endpoint.join(name);
        info!("Creating directory {}", path);
        let result = match self.backend(&endpoint) {
            Ok(backend) => backend.create_dir(&path).await,
            Err(e) => Err(e),
        };
        self.finish_file_op(side, &endpoint, result).await
    }

    /// Delete entries by name, recursing into directories.
    ///
    /// Stops at the first failure. Returns the number of removed entries.
    pub async fn delete(self: &Arc<Self>, side: Side, names: &[String]) -> Result<u64, SftpError> {
        let endpoint = self.endpoint(side)?;
        let result = match self.backend(&endpoint) {
            Ok(backend) => {
                let mut removed = 0u64;
                let mut outcome = Ok(());
                for name in names {
                    let path = endpoint.join(name);
                    info!("Deleting {}", path);
                    match backend.remove_recursive(&path).await {
                        Ok(n) => removed += n,
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                outcome.map(|_| removed)
            }
            Err(e) => Err(e),
        };
        self.finish_file_op(side, &endpoint, result).await
    }

    pub async fn rename(self: &Arc<Self>, side: Side, from: &str, to: &str) -> Result<(), SftpError> {
        let endpoint = self.endpoint(side)?;
        let (from_path, to_path) = (endpoint.join(from), endpoint.join(to));
        let result = match self.backend(&endpoint) {
            Ok(backend) => backend.rename(&from_path, &to_path).await,
            Err(e) => Err(e),
        };
        self.finish_file_op(side, &endpoint, result).await
    }

    pub async fn chmod(self: &Arc<Self>, side: Side, name: &str, mode: u32) -> Result<(), SftpError> {
        let endpoint = self.endpoint(side)?;
        let path = endpoint.join(name);
        info!("chmod {:o} {}", mode, path);
        let result = match self.backend(&endpoint) {
            Ok(backend) => backend.chmod(&path, mode).await,
            Err(e) => Err(e),
        };
        self.finish_file_op(side, &endpoint, result).await
    }

    // ── Tabs ──────────────────────────────────────────────────────────────

    /// Open an empty tab and make it active
    pub fn open_tab(&self, side: Side) -> String {
        let pane = Pane::new();
        let pane_id = pane.id.clone();
        {
            let mut sides = self.sides.write();
            let state = sides.get_mut(side);
            state.panes.push(pane.clone());
            state.active = pane_id.clone();
        }
        self.events.emit(EngineEvent::PaneChanged { side, pane });
        pane_id
    }

    pub fn activate_tab(&self, side: Side, pane_id: &str) -> Result<(), SftpError> {
        let snapshot = {
            let mut sides = self.sides.write();
            let state = sides.get_mut(side);
            let pane = state
                .panes
                .iter()
                .find(|p| p.id == pane_id)
                .cloned()
                .ok_or_else(|| SftpError::InvalidOperation(format!("No tab {} on {:?}", pane_id, side)))?;
            state.active = pane_id.to_string();
            pane
        };
        self.events.emit(EngineEvent::PaneChanged { side, pane: snapshot });
        Ok(())
    }

    /// Close a tab, releasing its connection.
    ///
    /// Closing the active tab promotes the tab at the same position, else the
    /// previous one. Closing the last tab leaves a fresh empty one.
    pub async fn close_tab(&self, side: Side, pane_id: &str) -> Result<(), SftpError> {
        let (closed, active) = {
            let mut sides = self.sides.write();
            let state = sides.get_mut(side);
            let idx = state
                .panes
                .iter()
                .position(|p| p.id == pane_id)
                .ok_or_else(|| SftpError::InvalidOperation(format!("No tab {} on {:?}", pane_id, side)))?;
            let closed = state.panes.remove(idx);

            if state.panes.is_empty() {
                state.panes.push(Pane::new());
            }
            if state.active == pane_id {
                let next = idx.min(state.panes.len() - 1);
                state.active = state.panes[next].id.clone();
            }
            (closed, state.active_pane().clone())
        };

        self.reconnects.lock().remove(pane_id);
        self.events.emit(EngineEvent::PaneChanged { side, pane: active });
        if let Some(conn) = closed.connection {
            info!("Closing tab {} ({})", pane_id, conn.label);
            self.release_connection(&conn.id).await;
        }
        Ok(())
    }

    /// Drop every pane connection
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let mut sides = self.sides.write();
            let mut ids = Vec::new();
            for side in [Side::Left, Side::Right] {
                for pane in sides.get_mut(side).panes.iter_mut() {
                    if let Some(conn) = pane.connection.take() {
                        ids.push(conn.id);
                    }
                    pane.clear_listing();
                }
            }
            ids
        };
        for id in ids {
            self.release_connection(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ssh::{AuthMaterial, HostDescriptor};
    use crate::testing::{MemoryBackend, MemoryConnector};

    struct Fixture {
        navigator: Arc<Navigator>,
        registry: Arc<SessionRegistry>,
        connector: Arc<MemoryConnector>,
        backend: Arc<MemoryBackend>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_dir("/home/dev/docs");
        backend.add_file("/home/dev/notes.txt", b"hello");
        backend.add_file("/home/dev/photo.png", b"png");
        let connector = Arc::new(MemoryConnector::new());
        connector.add_host("app", backend.clone());

        let config = Arc::new(EngineConfig::default());
        let registry = Arc::new(SessionRegistry::new(connector.clone()));
        let cache = Arc::new(DirectoryCache::new(config.cache_ttl()));
        let navigator = Arc::new(Navigator::new(registry.clone(), cache, EventBus::new(64), config));
        Fixture {
            navigator,
            registry,
            connector,
            backend,
        }
    }

    fn app() -> ConnectTarget {
        ConnectTarget::Remote(HostDescriptor::new("app", "dev", AuthMaterial::password("pw")))
    }

    fn names(pane: &Pane) -> Vec<String> {
        pane.entries.iter().map(|e| e.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_connect_lists_home_directory() {
        let f = fixture();
        let outcome = f.navigator.connect(Side::Left, app()).await.unwrap();
        assert_eq!(outcome, NavigateOutcome::Applied);

        let pane = f.navigator.active_pane(Side::Left);
        let conn = pane.connection.clone().unwrap();
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert_eq!(conn.current_path, "/home/dev");
        assert_eq!(names(&pane), vec!["docs", "notes.txt", "photo.png"]);
        assert!(!pane.loading);

        // Other side untouched
        assert!(f.navigator.active_pane(Side::Right).connection.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        let f = fixture();
        f.connector.set_refuse(true);
        assert!(f.navigator.connect(Side::Left, app()).await.is_err());

        let pane = f.navigator.active_pane(Side::Left);
        assert_eq!(pane.connection.as_ref().unwrap().status, ConnectionStatus::Error);
        assert!(pane.error.is_some());
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_navigation_wins() {
        let f = fixture();
        f.backend.add_file("/slow/a.txt", b"a");
        f.backend.add_file("/fast/b.txt", b"b");
        f.backend.set_list_delay("/slow", Duration::from_millis(500));
        f.navigator.connect(Side::Left, app()).await.unwrap();

        let navigator = f.navigator.clone();
        let slow = tokio::spawn(async move { navigator.navigate(Side::Left, "/slow", false).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fast = f.navigator.navigate(Side::Left, "/fast", false).await.unwrap();
        assert_eq!(fast, NavigateOutcome::Applied);
        assert_eq!(slow.await.unwrap().unwrap(), NavigateOutcome::Stale);

        let pane = f.navigator.active_pane(Side::Left);
        assert_eq!(pane.connection.as_ref().unwrap().current_path, "/fast");
        assert_eq!(names(&pane), vec!["b.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_listing_within_ttl() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();
        f.navigator.navigate(Side::Left, "/home/dev/docs", false).await.unwrap();
        let calls = f.backend.list_calls();

        f.navigator.navigate_up(Side::Left).await.unwrap();
        assert_eq!(f.backend.list_calls(), calls);

        f.navigator.refresh(Side::Left).await.unwrap();
        assert_eq!(f.backend.list_calls(), calls + 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        f.navigator.navigate(Side::Left, "/home/dev/docs", false).await.unwrap();
        assert_eq!(f.backend.list_calls(), calls + 2);
    }

    #[tokio::test]
    async fn test_listing_error_keeps_connection() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();
        let err = f.navigator.navigate(Side::Left, "/missing", false).await.unwrap_err();
        assert!(matches!(err, SftpError::FileNotFound(_)));

        let pane = f.navigator.active_pane(Side::Left);
        assert!(pane.error.is_some());
        assert_eq!(pane.connection.unwrap().current_path, "/home/dev");
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_with_entries_reconnects() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();
        let connection_id = f.navigator.active_pane(Side::Left).connection_id().unwrap().to_string();

        f.backend.set_session_lost(true);
        let outcome = f.navigator.refresh(Side::Left).await.unwrap();
        assert_eq!(outcome, NavigateOutcome::SessionLost);

        let pane = f.navigator.active_pane(Side::Left);
        assert!(pane.reconnecting);
        assert_eq!(names(&pane), vec!["docs", "notes.txt", "photo.png"]);
        assert!(f.registry.is_empty());

        f.backend.set_session_lost(false);
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let pane = f.navigator.active_pane(Side::Left);
        assert!(!pane.reconnecting);
        assert!(pane.error.is_none());
        let conn = pane.connection.unwrap();
        assert_eq!(conn.id, connection_id);
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert_eq!(f.connector.connect_count(), 2);
        assert!(f.registry.contains(&connection_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_on_empty_pane_disconnects() {
        let f = fixture();
        f.backend.add_dir("/home/dev/empty");
        f.navigator.connect(Side::Left, app()).await.unwrap();
        f.navigator.navigate(Side::Left, "/home/dev/empty", false).await.unwrap();

        f.backend.set_session_lost(true);
        let outcome = f.navigator.refresh(Side::Left).await.unwrap();
        assert_eq!(outcome, NavigateOutcome::SessionLost);

        let pane = f.navigator.active_pane(Side::Left);
        assert!(!pane.reconnecting);
        assert!(pane.error.is_some());
        assert_eq!(pane.connection.unwrap().status, ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_tabs_open_activate_close() {
        let f = fixture();
        let first = f.navigator.active_pane(Side::Right).id;
        let second = f.navigator.open_tab(Side::Right);
        assert_eq!(f.navigator.tabs(Side::Right).len(), 2);
        assert_eq!(f.navigator.active_pane(Side::Right).id, second);

        f.navigator.connect(Side::Right, app()).await.unwrap();
        assert_eq!(f.registry.len(), 1);

        f.navigator.close_tab(Side::Right, &second).await.unwrap();
        assert_eq!(f.navigator.active_pane(Side::Right).id, first);
        assert!(f.registry.is_empty());

        f.navigator.close_tab(Side::Right, &first).await.unwrap();
        let tabs = f.navigator.tabs(Side::Right);
        assert_eq!(tabs.len(), 1);
        assert_ne!(tabs[0].id, first);

        assert!(f.navigator.activate_tab(Side::Right, "nope").is_err());
    }

    #[tokio::test]
    async fn test_filter_and_selection() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();

        f.navigator.set_filter(Side::Left, "*.TXT");
        let visible: Vec<String> = f
            .navigator
            .visible_entries(Side::Left)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(visible, vec!["notes.txt"]);

        f.navigator.select_all(Side::Left);
        assert_eq!(f.navigator.selection(Side::Left), vec!["notes.txt"]);

        f.navigator.toggle_selection(Side::Left, "photo.png");
        f.navigator.toggle_selection(Side::Left, "notes.txt");
        f.navigator.toggle_selection(Side::Left, "ghost");
        assert_eq!(f.navigator.selection(Side::Left), vec!["photo.png"]);

        f.navigator.clear_selection(Side::Left);
        assert!(f.navigator.selection(Side::Left).is_empty());
    }

    #[tokio::test]
    async fn test_navigation_clears_selection() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();
        f.navigator.select(Side::Left, vec!["notes.txt".into()]);
        f.navigator.refresh(Side::Left).await.unwrap();
        assert_eq!(f.navigator.selection(Side::Left), vec!["notes.txt"]);

        f.navigator.navigate(Side::Left, "/home/dev/docs", false).await.unwrap();
        assert!(f.navigator.selection(Side::Left).is_empty());
    }

    #[tokio::test]
    async fn test_file_operations_refresh_listing() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();

        f.navigator.create_directory(Side::Left, "build").await.unwrap();
        assert!(f.backend.is_dir("/home/dev/build"));
        assert!(f.navigator.entry(Side::Left, "build").is_some());

        f.navigator.rename(Side::Left, "notes.txt", "todo.txt").await.unwrap();
        assert_eq!(f.backend.file("/home/dev/todo.txt").unwrap(), b"hello");
        assert!(f.navigator.entry(Side::Left, "notes.txt").is_none());

        f.navigator.chmod(Side::Left, "todo.txt", 0o600).await.unwrap();
        let entry = f.navigator.entry(Side::Left, "todo.txt").unwrap();
        assert_eq!(entry.permissions.as_deref(), Some("600"));

        f.backend.add_file("/home/dev/docs/a/b.txt", b"b");
        let removed = f.navigator.delete(Side::Left, &["docs".to_string()]).await.unwrap();
        assert_eq!(removed, 3);
        assert!(!f.backend.exists("/home/dev/docs"));
        assert!(f.navigator.entry(Side::Left, "docs").is_none());
    }

    #[tokio::test]
    async fn test_open_entry() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();

        let action = f.navigator.open_entry(Side::Left, "photo.png").await.unwrap();
        assert_eq!(action, OpenAction::OpenWith(None));

        let action = f.navigator.open_entry(Side::Left, "docs").await.unwrap();
        assert_eq!(action, OpenAction::Navigated(NavigateOutcome::Applied));
        let pane = f.navigator.active_pane(Side::Left);
        assert_eq!(pane.connection.unwrap().current_path, "/home/dev/docs");

        assert!(f.navigator.open_entry(Side::Left, "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let f = fixture();
        f.navigator.connect(Side::Left, app()).await.unwrap();
        f.navigator.disconnect(Side::Left).await;

        let pane = f.navigator.active_pane(Side::Left);
        assert!(pane.connection.is_none());
        assert!(pane.entries.is_empty());
        assert!(f.registry.is_empty());
        assert!(f.navigator.refresh(Side::Left).await.is_err());
    }
}
