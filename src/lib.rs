//! OxideXfer - remote file sessions and dual-pane transfers
//!
//! Local or SSH-tunneled (jump hosts, SOCKS5 / HTTP CONNECT proxies) file
//! sessions, cached directory browsing on two independent sides, and a
//! transfer pipeline with conflict handling and progress reporting.

pub mod config;
pub mod engine;
pub mod events;
pub mod pane;
pub mod session;
pub mod sftp;
pub mod ssh;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use engine::Engine;
pub use events::{EngineEvent, EventBus};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Calling it twice is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
