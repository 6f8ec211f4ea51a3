//! Transfer control
//!
//! Each running copy registers a [`TransferControl`]; cancellation flips its
//! watch channel and the copy loop notices between chunks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::SftpError;

/// Cancellation signal for one transfer
#[derive(Debug)]
pub struct TransferControl {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // Sender lives in self, so wait_for only fails if self is gone
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters one run of a transfer on drop, on every exit path.
///
/// A later run registered under the same id is left alone.
pub struct TransferGuard {
    manager: Arc<TransferManager>,
    transfer_id: String,
    control: Arc<TransferControl>,
}

impl TransferGuard {
    pub fn new(manager: &Arc<TransferManager>, transfer_id: impl Into<String>, control: &Arc<TransferControl>) -> Self {
        Self {
            manager: manager.clone(),
            transfer_id: transfer_id.into(),
            control: control.clone(),
        }
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.manager.unregister_run(&self.transfer_id, &self.control);
    }
}

/// Tracks the controls of in-flight transfers
#[derive(Default)]
pub struct TransferManager {
    controls: RwLock<HashMap<String, Arc<TransferControl>>>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer and get its control handle.
    ///
    /// A cancelled leftover under the same id is replaced.
    pub fn register(&self, transfer_id: &str) -> Arc<TransferControl> {
        let control = Arc::new(TransferControl::new());
        self.controls
            .write()
            .insert(transfer_id.to_string(), control.clone());
        debug!("Registered transfer: {}", transfer_id);
        control
    }

    pub fn get_control(&self, transfer_id: &str) -> Option<Arc<TransferControl>> {
        self.controls.read().get(transfer_id).cloned()
    }

    /// Whether `control` is the run currently registered under `transfer_id`
    pub fn is_current(&self, transfer_id: &str, control: &Arc<TransferControl>) -> bool {
        self.get_control(transfer_id)
            .is_some_and(|current| Arc::ptr_eq(&current, control))
    }

    /// Unregister only if `control` is still the registered run
    pub fn unregister_run(&self, transfer_id: &str, control: &Arc<TransferControl>) {
        let mut controls = self.controls.write();
        if controls
            .get(transfer_id)
            .is_some_and(|current| Arc::ptr_eq(current, control))
        {
            controls.remove(transfer_id);
            debug!("Unregistered transfer: {}", transfer_id);
        }
    }

    pub fn registered_count(&self) -> usize {
        self.controls.read().len()
    }

    pub fn cancel(&self, transfer_id: &str) -> bool {
        if let Some(control) = self.controls.read().get(transfer_id) {
            control.cancel();
            info!("Cancelled transfer: {}", transfer_id);
            true
        } else {
            warn!("Transfer not running, nothing to signal: {}", transfer_id);
            false
        }
    }

    pub fn cancel_all(&self) {
        for (id, control) in self.controls.read().iter() {
            control.cancel();
            info!("Cancelled transfer: {}", id);
        }
    }
}

/// Bail out with `TransferCancelled` once the control has been cancelled
pub fn check_transfer_control(control: &TransferControl) -> Result<(), SftpError> {
    if control.is_cancelled() {
        return Err(SftpError::TransferCancelled);
    }
    Ok(())
}
