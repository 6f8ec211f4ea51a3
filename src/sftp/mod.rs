//! File access module
//!
//! Backends for local and SFTP file access, the listing cache, and the
//! primitives the transfer pipeline is built from.

pub mod backend;
pub mod cache;
pub mod error;
pub mod local;
pub mod path_utils;
pub mod progress;
pub mod remote;
pub mod transfer;
pub mod types;

pub use backend::{BoxedReader, BoxedWriter, FileBackend};
pub use cache::DirectoryCache;
pub use error::SftpError;
pub use local::LocalBackend;
pub use path_utils::PathStyle;
pub use remote::RemoteBackend;
pub use transfer::{check_transfer_control, TransferControl, TransferGuard, TransferManager};
pub use types::*;
