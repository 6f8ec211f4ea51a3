//! Transfer Pipeline
//!
//! A batch turns selected entries into tasks and runs them one after the
//! other. File tasks check for a conflict, then copy by streaming when both
//! ends can, else buffered with simulated progress. Directory tasks mirror
//! the tree by spawning child tasks and take their status from them.
//!
//! Task errors are recorded on the task; nothing escapes the batch loop.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::copy::{buffered_copy, spawn_stream_copy, CopyEvent, CopyJob};
use super::types::{
    reconcile_status, ConflictResolution, FileConflict, TransferDirection, TransferStatus, TransferTask,
};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::pane::{Endpoint, Navigator, Side};
use crate::session::SessionRegistry;
use crate::sftp::path_utils::{duplicate_path, file_name, join_path};
use crate::sftp::progress::spawn_simulation;
use crate::sftp::{
    sort_entries, DirectoryCache, FileEntry, SftpError, TransferControl, TransferGuard, TransferManager,
};

/// How a task run ended
enum Done {
    Completed(u64),
    /// Waiting on a conflict decision
    Parked,
    /// Directory status taken from its children
    Reconciled(TransferStatus),
}

type TaskFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub struct TransferPipeline {
    tasks: RwLock<Vec<TransferTask>>,
    conflicts: RwLock<Vec<FileConflict>>,
    manager: Arc<TransferManager>,
    registry: Arc<SessionRegistry>,
    navigator: Arc<Navigator>,
    cache: Arc<DirectoryCache>,
    events: EventBus,
    config: Arc<EngineConfig>,
}

impl TransferPipeline {
    pub fn new(
        registry: Arc<SessionRegistry>,
        navigator: Arc<Navigator>,
        cache: Arc<DirectoryCache>,
        events: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            conflicts: RwLock::new(Vec::new()),
            manager: Arc::new(TransferManager::new()),
            registry,
            navigator,
            cache,
            events,
            config,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn tasks(&self) -> Vec<TransferTask> {
        self.tasks.read().clone()
    }

    pub fn task(&self, id: &str) -> Option<TransferTask> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn conflicts(&self) -> Vec<FileConflict> {
        self.conflicts.read().clone()
    }

    /// Tasks queued, running, or parked on a conflict
    pub fn active_count(&self) -> usize {
        self.tasks.read().iter().filter(|t| !t.status.is_finished()).count()
    }

    // ── Task table helpers ────────────────────────────────────────────────

    /// Apply `f` to a task; announce it when `f` reports a change
    fn update_task(&self, id: &str, f: impl FnOnce(&mut TransferTask) -> bool) -> Option<TransferTask> {
        let snapshot = {
            let mut tasks = self.tasks.write();
            let task = tasks.iter_mut().find(|t| t.id == id)?;
            if !f(task) {
                return None;
            }
            task.clone()
        };
        self.events.emit(EngineEvent::TransferChanged { task: snapshot.clone() });
        Some(snapshot)
    }

    fn insert_task(&self, task: TransferTask) {
        self.tasks.write().push(task.clone());
        self.events.emit(EngineEvent::TransferChanged { task });
    }

    fn children_of(&self, id: &str) -> Vec<TransferTask> {
        self.tasks
            .read()
            .iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(id))
            .cloned()
            .collect()
    }

    /// Ids of every task below `id`
    fn descendants(&self, id: &str) -> Vec<String> {
        let tasks = self.tasks.read();
        let mut found = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for task in tasks.iter().filter(|t| t.parent_task_id.as_deref() == Some(current.as_str())) {
                found.push(task.id.clone());
                frontier.push(task.id.clone());
            }
        }
        found
    }

    fn report_progress(&self, id: &str, transferred: u64, total: u64, speed: u64) {
        self.update_task(id, |task| {
            if task.status != TransferStatus::Transferring {
                return false;
            }
            task.transferred_bytes = transferred;
            task.total_bytes = total.max(transferred);
            task.speed = speed;
            true
        });
    }

    fn raise_conflict(&self, conflict: FileConflict) {
        info!("Conflict on {}: target exists", conflict.target_path);
        {
            let mut conflicts = self.conflicts.write();
            conflicts.retain(|c| c.transfer_id != conflict.transfer_id);
            conflicts.push(conflict.clone());
        }
        self.events.emit(EngineEvent::ConflictRaised { conflict });
    }

    fn drop_conflicts(&self, ids: &HashSet<String>) {
        let dropped: Vec<String> = {
            let mut conflicts = self.conflicts.write();
            let dropped = conflicts
                .iter()
                .filter(|c| ids.contains(&c.transfer_id))
                .map(|c| c.transfer_id.clone())
                .collect();
            conflicts.retain(|c| !ids.contains(&c.transfer_id));
            dropped
        };
        for transfer_id in dropped {
            self.events.emit(EngineEvent::ConflictCleared { transfer_id });
        }
    }

    // ── Batches ───────────────────────────────────────────────────────────

    /// Create tasks for `names` selected on `from`, targeting the directory
    /// shown on `to`. Nothing runs yet.
    pub async fn enqueue(&self, names: &[String], from: Side, to: Side) -> Result<Vec<String>, SftpError> {
        let source = self.navigator.endpoint(from)?;
        let target = self.navigator.endpoint(to)?;
        let direction = TransferDirection::between(source.kind, target.kind).ok_or_else(|| {
            SftpError::TransferError("Both panes are local; use a file manager to copy locally".into())
        })?;
        let source_backend = self.registry.get(&source.connection_id)?;

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let source_path = source.join(name);
            let (total, is_directory) = match source_backend.stat(&source_path).await {
                Ok(entry) => (self.estimate(&entry), entry.is_dir_like()),
                Err(e) => {
                    debug!("Size of {} unknown ({}), using estimate", source_path, e);
                    let is_directory = self
                        .navigator
                        .entry(from, name)
                        .map(|entry| entry.is_dir_like())
                        .unwrap_or(false);
                    (self.config.default_size_estimate, is_directory)
                }
            };

            let task = new_task(
                name,
                source_path,
                target.join(name),
                (&source, from),
                (&target, to),
                direction,
                total,
                is_directory,
            );
            ids.push(task.id.clone());
            self.insert_task(task);
        }

        info!(
            "Queued {} {:?} transfer(s) from {:?} to {:?}",
            ids.len(),
            direction,
            from,
            to
        );
        Ok(ids)
    }

    /// Run queued tasks strictly in order
    pub async fn run_batch(self: &Arc<Self>, ids: &[String]) {
        for id in ids {
            self.process(id).await;
        }
    }

    /// Queue and run a batch to completion
    pub async fn start_transfer(self: &Arc<Self>, names: &[String], from: Side, to: Side) -> Result<Vec<String>, SftpError> {
        let ids = self.enqueue(names, from, to).await?;
        self.run_batch(&ids).await;
        Ok(ids)
    }

    fn estimate(&self, entry: &FileEntry) -> u64 {
        if entry.is_dir_like() && entry.size == 0 {
            self.config.default_size_estimate
        } else {
            entry.size
        }
    }

    // ── Running tasks ─────────────────────────────────────────────────────

    fn process<'a>(self: &'a Arc<Self>, id: &'a str) -> TaskFuture<'a> {
        Box::pin(async move {
            let Some(task) = self.task(id) else {
                debug!("Transfer {} vanished before start", id);
                return;
            };
            if task.status != TransferStatus::Pending {
                debug!("Transfer {} is {:?}, not starting", id, task.status);
                return;
            }

            let control = self.manager.register(id);
            let _guard = TransferGuard::new(&self.manager, id, &control);
            self.update_task(id, |t| {
                t.status = TransferStatus::Transferring;
                t.transferred_bytes = 0;
                t.speed = 0;
                t.error = None;
                true
            });

            let result = if task.is_directory {
                self.copy_directory(&task, &control).await
            } else {
                self.copy_file(&task, &control).await
            };
            let status = self.finish(id, &control, result);

            match &task.parent_task_id {
                Some(parent) => {
                    if let Some(root) = self.reconcile_up(parent) {
                        self.refresh_destination(&root).await;
                    }
                }
                None if status == Some(TransferStatus::Completed) => self.refresh_destination(&task).await,
                None => {}
            }
        })
    }

    async fn refresh_destination(&self, task: &TransferTask) {
        self.cache.invalidate(&task.target_connection_id);
        self.navigator
            .refresh_if_showing(task.target_side, &task.target_connection_id)
            .await;
    }

    /// Record how a run ended. A cancelled task stays cancelled, and a run
    /// that has been superseded leaves the task alone.
    fn finish(&self, id: &str, control: &Arc<TransferControl>, result: Result<Done, SftpError>) -> Option<TransferStatus> {
        if !self.manager.is_current(id, control) {
            debug!("Run of transfer {} superseded, dropping its result", id);
            return None;
        }
        let updated = self.update_task(id, |task| {
            if task.status == TransferStatus::Cancelled {
                return false;
            }
            task.speed = 0;
            match result {
                Ok(Done::Completed(bytes)) => {
                    task.status = TransferStatus::Completed;
                    task.total_bytes = bytes;
                    task.transferred_bytes = bytes;
                    info!("Transfer {} completed ({} bytes)", task.file_name, bytes);
                }
                Ok(Done::Parked) => {
                    task.status = TransferStatus::Pending;
                    task.transferred_bytes = 0;
                }
                Ok(Done::Reconciled(status)) => apply_reconciled(task, status),
                Err(SftpError::TransferCancelled) => {
                    task.status = TransferStatus::Cancelled;
                }
                Err(e) => {
                    warn!("Transfer {} failed: {}", task.file_name, e);
                    task.status = TransferStatus::Failed;
                    task.error = Some(e.to_string());
                }
            }
            true
        });
        updated.map(|t| t.status)
    }

    async fn copy_file(self: &Arc<Self>, task: &TransferTask, control: &Arc<TransferControl>) -> Result<Done, SftpError> {
        let source = self.registry.get(&task.source_connection_id)?;
        let target = self.registry.get(&task.target_connection_id)?;

        let incoming = source.stat(&task.source_path).await?;
        if !task.skip_conflict_check {
            if let Some(existing) = target.try_stat(&task.target_path).await? {
                self.raise_conflict(FileConflict {
                    transfer_id: task.id.clone(),
                    file_name: task.file_name.clone(),
                    source_path: task.source_path.clone(),
                    target_path: task.target_path.clone(),
                    existing_size: existing.size,
                    existing_modified_at: existing.modified_at,
                    new_size: incoming.size,
                    new_modified_at: incoming.modified_at,
                });
                return Ok(Done::Parked);
            }
        }

        let total = incoming.size;
        let job = CopyJob {
            source: source.clone(),
            source_path: task.source_path.clone(),
            target: target.clone(),
            target_path: task.target_path.clone(),
            total,
        };

        if source.supports_streaming() && target.supports_streaming() {
            debug!("Streaming {} -> {}", task.source_path, task.target_path);
            let mut rx = spawn_stream_copy(job, self.config.chunk_size, control.clone());
            while let Some(event) = rx.recv().await {
                match event {
                    CopyEvent::Progress(p) => self.report_progress(&task.id, p.transferred, p.total, p.speed),
                    CopyEvent::Finished(result) => return result.map(Done::Completed),
                }
            }
            return Err(SftpError::TransferError("copy task ended without a result".into()));
        }

        debug!("Buffered copy {} -> {}", task.source_path, task.target_path);
        let pipeline = Arc::clone(self);
        let id = task.id.clone();
        buffered_copy(
            &job,
            self.config.simulated_rate_bps,
            self.config.simulated_tick(),
            control,
            move |bytes, speed| pipeline.report_progress(&id, bytes, total, speed),
        )
        .await
        .map(Done::Completed)
    }

    async fn copy_directory(
        self: &Arc<Self>,
        task: &TransferTask,
        control: &Arc<TransferControl>,
    ) -> Result<Done, SftpError> {
        let source = self.registry.get(&task.source_connection_id)?;
        let target = self.registry.get(&task.target_connection_id)?;

        match target.try_stat(&task.target_path).await? {
            Some(existing) if existing.is_dir_like() => {
                debug!("Reusing existing directory {}", task.target_path);
            }
            Some(_) => {
                return Err(SftpError::AlreadyExists(format!(
                    "{} exists and is not a directory",
                    task.target_path
                )));
            }
            None => target.create_dir(&task.target_path).await?,
        }

        let mut entries = source.list_dir(&task.source_path).await?;
        sort_entries(&mut entries);

        let pipeline = Arc::clone(self);
        let id = task.id.clone();
        let total = task.total_bytes;
        let simulation = spawn_simulation(
            total,
            self.config.simulated_rate_bps,
            self.config.simulated_tick(),
            move |bytes, speed| pipeline.report_progress(&id, bytes, total, speed),
        );

        let mut child_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let child = self.child_task(task, entry);
            child_ids.push(child.id.clone());
            self.insert_task(child);
        }
        debug!("{} items under {}", child_ids.len(), task.source_path);

        for child in &child_ids {
            if control.is_cancelled() {
                break;
            }
            self.process(child).await;
        }
        simulation.stop();

        if control.is_cancelled() {
            return Err(SftpError::TransferCancelled);
        }
        let statuses: Vec<TransferStatus> = self.children_of(&task.id).iter().map(|t| t.status).collect();
        Ok(Done::Reconciled(reconcile_status(&statuses)))
    }

    fn child_task(&self, parent: &TransferTask, entry: &FileEntry) -> TransferTask {
        TransferTask {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: entry.name.clone(),
            source_path: join_path(parent.direction.source_style(), &parent.source_path, &entry.name),
            target_path: join_path(parent.direction.target_style(), &parent.target_path, &entry.name),
            source_connection_id: parent.source_connection_id.clone(),
            target_connection_id: parent.target_connection_id.clone(),
            source_side: parent.source_side,
            target_side: parent.target_side,
            direction: parent.direction,
            status: TransferStatus::Pending,
            total_bytes: self.estimate(entry),
            transferred_bytes: 0,
            speed: 0,
            is_directory: entry.is_dir_like(),
            parent_task_id: Some(parent.id.clone()),
            skip_conflict_check: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Recompute parent statuses after a child changed outside its parent's run.
    ///
    /// Returns the top-level task if this completed it.
    fn reconcile_up(&self, id: &str) -> Option<TransferTask> {
        let mut current = Some(id.to_string());
        while let Some(parent_id) = current.take() {
            let parent = self.task(&parent_id)?;
            // A running parent reconciles itself when its loop ends
            if matches!(parent.status, TransferStatus::Transferring | TransferStatus::Cancelled) {
                return None;
            }
            let statuses: Vec<TransferStatus> = self.children_of(&parent_id).iter().map(|t| t.status).collect();
            let status = reconcile_status(&statuses);
            let updated = self.update_task(&parent_id, |task| {
                if task.status == status {
                    return false;
                }
                apply_reconciled(task, status);
                true
            });
            if parent.parent_task_id.is_none() {
                return updated.filter(|t| t.status == TransferStatus::Completed);
            }
            current = parent.parent_task_id;
        }
        None
    }

    // ── Commands ──────────────────────────────────────────────────────────

    /// Cancel a task and everything below it
    pub fn cancel_transfer(&self, id: &str) -> Result<(), SftpError> {
        let task = self
            .task(id)
            .ok_or_else(|| SftpError::TransferNotFound(id.to_string()))?;

        let mut ids: HashSet<String> = self.descendants(id).into_iter().collect();
        ids.insert(id.to_string());
        info!("Cancelling transfer {} ({} task(s))", task.file_name, ids.len());

        for task_id in &ids {
            self.manager.cancel(task_id);
            self.update_task(task_id, |t| {
                if t.status.is_finished() {
                    return false;
                }
                t.status = TransferStatus::Cancelled;
                t.speed = 0;
                true
            });
        }
        self.drop_conflicts(&ids);

        if let Some(parent) = &task.parent_task_id {
            self.reconcile_up(parent);
        }
        Ok(())
    }

    pub fn cancel_all(&self) {
        let ids: HashSet<String> = self
            .tasks
            .read()
            .iter()
            .filter(|t| !t.status.is_finished())
            .map(|t| t.id.clone())
            .collect();
        info!("Cancelling {} transfer(s)", ids.len());

        self.manager.cancel_all();
        for id in &ids {
            self.update_task(id, |t| {
                if t.status.is_finished() {
                    return false;
                }
                t.status = TransferStatus::Cancelled;
                t.speed = 0;
                true
            });
        }
        let all: HashSet<String> = self.conflicts.read().iter().map(|c| c.transfer_id.clone()).collect();
        self.drop_conflicts(&all);
    }

    /// Re-run a failed or cancelled task in place
    pub async fn retry_transfer(self: &Arc<Self>, id: &str) -> Result<(), SftpError> {
        let task = self
            .task(id)
            .ok_or_else(|| SftpError::TransferNotFound(id.to_string()))?;
        if !matches!(task.status, TransferStatus::Failed | TransferStatus::Cancelled) {
            return Err(SftpError::InvalidOperation(format!(
                "Only failed or cancelled transfers can be retried ({} is {:?})",
                task.file_name, task.status
            )));
        }
        if self.manager.get_control(id).is_some() {
            return Err(SftpError::InvalidOperation(format!(
                "{} is still stopping, retry once it has settled",
                task.file_name
            )));
        }

        if task.is_directory {
            let stale: HashSet<String> = self.descendants(id).into_iter().collect();
            debug!("Dropping {} child task(s) of {}", stale.len(), task.file_name);
            self.tasks.write().retain(|t| !stale.contains(&t.id));
            self.drop_conflicts(&stale);
        }

        info!("Retrying transfer {}", task.file_name);
        self.update_task(id, |t| {
            t.status = TransferStatus::Pending;
            t.transferred_bytes = 0;
            t.speed = 0;
            t.error = None;
            true
        });
        self.process(id).await;
        Ok(())
    }

    /// Settle a parked task
    pub async fn resolve_conflict(self: &Arc<Self>, id: &str, resolution: ConflictResolution) -> Result<(), SftpError> {
        let conflict = {
            let mut conflicts = self.conflicts.write();
            let idx = conflicts
                .iter()
                .position(|c| c.transfer_id == id)
                .ok_or_else(|| SftpError::InvalidOperation(format!("No pending conflict for transfer {}", id)))?;
            conflicts.remove(idx)
        };
        self.events.emit(EngineEvent::ConflictCleared {
            transfer_id: id.to_string(),
        });
        let task = self
            .task(id)
            .ok_or_else(|| SftpError::TransferNotFound(id.to_string()))?;

        info!("Conflict on {} resolved: {:?}", conflict.target_path, resolution);
        match resolution {
            ConflictResolution::Skip => {
                self.update_task(id, |t| {
                    t.status = TransferStatus::Cancelled;
                    true
                });
                if let Some(root) = task.parent_task_id.as_deref().and_then(|p| self.reconcile_up(p)) {
                    self.refresh_destination(&root).await;
                }
            }
            ConflictResolution::Replace => {
                self.update_task(id, |t| {
                    t.skip_conflict_check = true;
                    t.status = TransferStatus::Pending;
                    true
                });
                self.process(id).await;
            }
            ConflictResolution::Duplicate => {
                let target_path = duplicate_path(task.direction.target_style(), &task.target_path);
                self.update_task(id, |t| {
                    t.file_name = file_name(&target_path).to_string();
                    t.target_path = target_path.clone();
                    t.skip_conflict_check = true;
                    t.status = TransferStatus::Pending;
                    true
                });
                self.process(id).await;
            }
        }
        Ok(())
    }

    /// Drop finished top-level tasks and their children.
    ///
    /// Returns the number of tasks removed.
    pub fn clear_finished(&self) -> usize {
        let roots: Vec<String> = self
            .tasks
            .read()
            .iter()
            .filter(|t| t.parent_task_id.is_none() && t.status.is_finished())
            .map(|t| t.id.clone())
            .collect();

        let mut doomed: HashSet<String> = HashSet::new();
        for root in roots {
            doomed.extend(self.descendants(&root));
            doomed.insert(root);
        }

        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| !doomed.contains(&t.id));
        before - tasks.len()
    }
}

fn apply_reconciled(task: &mut TransferTask, status: TransferStatus) {
    task.status = status;
    match status {
        TransferStatus::Completed => {
            task.transferred_bytes = task.total_bytes;
            task.error = None;
        }
        TransferStatus::Failed => task.error = Some("One or more items failed".into()),
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn new_task(
    name: &str,
    source_path: String,
    target_path: String,
    (source, source_side): (&Endpoint, Side),
    (target, target_side): (&Endpoint, Side),
    direction: TransferDirection,
    total_bytes: u64,
    is_directory: bool,
) -> TransferTask {
    TransferTask {
        id: uuid::Uuid::new_v4().to_string(),
        file_name: name.to_string(),
        source_path,
        target_path,
        source_connection_id: source.connection_id.clone(),
        target_connection_id: target.connection_id.clone(),
        source_side,
        target_side,
        direction,
        status: TransferStatus::Pending,
        total_bytes,
        transferred_bytes: 0,
        speed: 0,
        is_directory,
        parent_task_id: None,
        skip_conflict_check: false,
        error: None,
        created_at: Utc::now(),
    }
}
