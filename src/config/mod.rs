//! Configuration Module
//!
//! Engine tuning knobs and the open-behaviour settings handed over by the
//! settings layer, loadable from a JSON file.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigStorage, StorageError};
pub use types::{EngineConfig, OpenBehavior};
