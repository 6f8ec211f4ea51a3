//! Dual-pane navigation
//!
//! Two sides, each with tabs; every tab may hold one connection and shows
//! one directory of it.

pub mod filter;
mod navigator;
mod types;

pub use navigator::{Endpoint, Navigator};
pub use types::{Connection, ConnectionStatus, NavigateOutcome, OpenAction, Pane, Side};
