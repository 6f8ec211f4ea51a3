//! SSH module - transport construction for remote file sessions
//!
//! # Features
//! - Direct SSH connections
//! - Forward proxies (HTTP CONNECT, SOCKS5) in front of the first hop
//! - ProxyJump (jump host) chains of any length
//! - Certificate / key / agent / password authentication with fallback

mod agent;
pub mod auth;
pub mod chain;
mod client;
mod config;
mod error;
mod handle_owner;
pub mod proxy_socket;

pub use agent::SshAgentClient;
pub use auth::{AuthOutcome, AuthStep, Authenticator};
pub use chain::{connect_chain, teardown_hops, ChainConnection, HopDialer, HopSession, LiveHop};
pub use client::{ClientHandler, SshDialer, SshHop};
pub use config::{
    AuthMaterial, CertificateFile, HopDescriptor, HostDescriptor, KeyFile, ProxyDescriptor,
    ProxyKind,
};
pub use error::{Socks5Failure, SshError};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use proxy_socket::{connect_through_proxy, BoxedStream, TransportStream};
