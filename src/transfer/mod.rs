//! Transfers between panes
//!
//! - Task and conflict types
//! - Streaming and buffered copy primitives
//! - The pipeline that queues, runs, and settles tasks

pub mod copy;
mod pipeline;
pub mod types;

pub use pipeline::TransferPipeline;
pub use types::{
    reconcile_status, ConflictResolution, FileConflict, TransferDirection, TransferStatus, TransferTask,
};
