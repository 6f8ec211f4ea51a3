//! Handle Owner Task
//!
//! Only one task owns a `Handle<ClientHandler>`. Hop sessions, the SFTP
//! backend and teardown talk to it through a cloneable [`HandleController`],
//! so no lock is ever held across an `.await` on the handle.

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (used for the sftp subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-tcpip channel (used to reach the next hop)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect and stop the task; replies once the SSH disconnect was sent
    Disconnect { reply_tx: oneshot::Sender<()> },
}

/// Cloneable front-end to the Handle Owner Task
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Controller over an arbitrary command channel (tests drive the receiver by hand)
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { cmd_tx }
    }

    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Disconnect the SSH connection and wait until the owner task acknowledged it.
    ///
    /// Returns `Err(Disconnected)` when the task had already exited.
    pub async fn disconnect(&self) -> Result<(), SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::Disconnect { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx.await.map_err(|_| SshError::Disconnected)
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task, consuming the authenticated handle
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);

    tokio::spawn(async move {
        let handle = handle;
        let mut disconnect_ack: Option<oneshot::Sender<()>> = None;

        debug!("Handle owner task started for {}", label);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }

                HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                } => {
                    let result = handle
                        .channel_open_direct_tcpip(&host, port, &originator_host, originator_port)
                        .await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving direct_tcpip result");
                    }
                }

                HandleCommand::Disconnect { reply_tx } => {
                    info!("Disconnect requested for {}", label);
                    disconnect_ack = Some(reply_tx);
                    break;
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("SSH disconnect for {} reported: {}", label, e);
        }
        if let Some(ack) = disconnect_ack {
            let _ = ack.send(());
        }
        info!("Handle owner task terminated for {}", label);
    });

    HandleController { cmd_tx }
}

/// Fail every queued command with `Disconnect`
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect { reply_tx } => {
                let _ = reply_tx.send(());
            }
        }
    }
}
