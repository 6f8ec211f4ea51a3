//! Session management
//!
//! - Registry of live file sessions keyed by connection id
//! - Per-side sequencing for stale-result suppression

mod registry;
mod sequencer;
pub mod types;

pub use registry::{home_candidates, probe_home_dir, Connector, SessionRegistry, SshConnector};
pub use sequencer::SideSequencer;
pub use types::{ConnectTarget, ConnectionKind, OpenedSession, RemoteLink};
