//! ProxyJump chain
//!
//! Connects through an ordered list of jump hosts using `direct-tcpip`
//! channels, SSH-over-SSH:
//!
//! ```text
//! Client --[proxy?]--SSH--> [Jump1] --direct-tcpip--> [Jump2] --> ... --> [JumpN] --direct-tcpip--> [Target]
//! ```
//!
//! # Steps
//!
//! 1. Transport for Jump1: proxy stream when configured, else direct TCP
//! 2. Authenticate Jump1 → session 1
//! 3. Session 1 opens direct-tcpip to Jump2 → stream 1
//! 4. Authenticate Jump2 over stream 1 → session 2
//! 5. Repeat until JumpN, whose tunnel points at the final target
//!
//! The last tunnel is returned raw; the caller runs the target's own SSH
//! handshake over it. Every hop session is kept alive for the lifetime of the
//! connection and torn down in reverse order. When hop k fails, hops
//! `1..k-1` are torn down before the error is returned.

use async_trait::async_trait;
use tracing::{info, warn};

use super::config::{HopDescriptor, ProxyDescriptor};
use super::error::SshError;
use super::proxy_socket::{connect_through_proxy, BoxedStream};

/// An authenticated SSH session on one hop
#[async_trait]
pub trait HopSession: Send + Sync {
    fn label(&self) -> &str;

    /// Ask this hop to forward a new logical channel to `host:port`
    async fn open_tunnel(&self, host: &str, port: u16) -> Result<BoxedStream, SshError>;

    /// Close the session
    async fn teardown(self: Box<Self>) -> Result<(), SshError>;
}

/// A retained hop session
pub type LiveHop = Box<dyn HopSession>;

/// Establishes authenticated sessions to hosts
#[async_trait]
pub trait HopDialer: Send + Sync {
    /// Connect and authenticate to `hop`, over `via` when given or a fresh TCP socket otherwise
    async fn dial(&self, hop: &HopDescriptor, via: Option<BoxedStream>) -> Result<LiveHop, SshError>;
}

/// End-to-end stream plus the hop sessions that carry it
pub struct ChainConnection {
    pub stream: BoxedStream,
    /// Order: [jump1, jump2, ..., jumpN]
    pub hops: Vec<LiveHop>,
}

/// Connect through `hops` to `final_host:final_port`
pub async fn connect_chain(
    dialer: &dyn HopDialer,
    hops: &[HopDescriptor],
    final_host: &str,
    final_port: u16,
    proxy: Option<&ProxyDescriptor>,
) -> Result<ChainConnection, SshError> {
    let first = hops
        .first()
        .ok_or_else(|| SshError::ConnectionFailed("Proxy chain is empty".into()))?;

    info!(
        "Establishing multi-hop SSH: {} jump host(s) to {}:{}",
        hops.len(),
        final_host,
        final_port
    );

    let mut via = match proxy {
        Some(proxy) => Some(connect_through_proxy(proxy, &first.hostname, first.port).await?),
        None => None,
    };
    let mut live: Vec<LiveHop> = Vec::with_capacity(hops.len());

    for (i, hop) in hops.iter().enumerate() {
        info!(
            "Jump host {}: connecting to {}@{}:{}",
            i + 1,
            hop.username,
            hop.hostname,
            hop.port
        );

        let session = match dialer.dial(hop, via.take()).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Jump host {} ({}) failed: {}", i + 1, hop.display_name(), e);
                teardown_hops(live).await;
                return Err(tag_hop_error(e, i, hop));
            }
        };

        let (next_host, next_port) = match hops.get(i + 1) {
            Some(next) => (next.hostname.as_str(), next.port),
            None => (final_host, final_port),
        };

        let tunnel = session.open_tunnel(next_host, next_port).await;
        live.push(session);

        match tunnel {
            Ok(stream) => via = Some(stream),
            Err(e) => {
                warn!(
                    "Jump host {} ({}) could not open tunnel to {}:{}: {}",
                    i + 1,
                    hop.display_name(),
                    next_host,
                    next_port,
                    e
                );
                teardown_hops(live).await;
                return Err(SshError::ConnectionFailed(format!(
                    "Failed to open tunnel from {} to {}:{}: {}",
                    hop.display_name(),
                    next_host,
                    next_port,
                    e
                )));
            }
        }
    }

    let stream = via.ok_or_else(|| {
        SshError::ConnectionFailed("No stream available for target connection".into())
    })?;

    info!("Tunnel to {}:{} ready through {} hop(s)", final_host, final_port, live.len());
    Ok(ChainConnection { stream, hops: live })
}

/// Tear down hop sessions last-to-first, logging failures
pub async fn teardown_hops(hops: Vec<LiveHop>) {
    for hop in hops.into_iter().rev() {
        let label = hop.label().to_string();
        if let Err(e) = hop.teardown().await {
            warn!("Teardown of {} failed: {}", label, e);
        }
    }
}

fn tag_hop_error(err: SshError, index: usize, hop: &HopDescriptor) -> SshError {
    match err {
        SshError::AuthenticationFailed(reason) => SshError::ChainAuth {
            hop: index + 1,
            label: hop.display_name().to_string(),
            reason,
        },
        other => other,
    }
}
