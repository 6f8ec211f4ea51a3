//! Engine events
//!
//! State changes are pushed on a broadcast channel. Receivers that lag lose
//! the oldest events; every event carries a full snapshot, so the next one
//! received is enough to resync.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::pane::{Pane, Side};
use crate::transfer::{FileConflict, TransferTask};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    PaneChanged { side: Side, pane: Pane },
    TransferChanged { task: TransferTask },
    ConflictRaised { conflict: FileConflict },
    #[serde(rename_all = "camelCase")]
    ConflictCleared { transfer_id: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to current subscribers; no subscribers is fine
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(EngineEvent::ConflictCleared {
            transfer_id: "t1".into(),
        });
    }

    #[tokio::test]
    async fn test_event_serializes_with_tag() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::ConflictCleared {
            transfer_id: "t1".into(),
        });
        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflictCleared");
        assert_eq!(json["transferId"], "t1");
    }
}
