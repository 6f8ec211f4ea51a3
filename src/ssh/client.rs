//! russh-backed hop dialing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

use super::agent::SshAgentClient;
use super::auth::{authenticate, expand_tilde, AuthOutcome, AuthStep, Authenticator};
use super::chain::{HopDialer, HopSession, LiveHop};
use super::config::HopDescriptor;
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::proxy_socket::BoxedStream;

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    /// Host keys are accepted and logged; pinning belongs to the identity store
    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        info!(
            "Host key for {}:{}: {}",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// Runs [`AuthStep`]s against a russh handle
struct HandleAuthenticator<'a> {
    handle: &'a mut Handle<ClientHandler>,
}

fn outcome(result: client::AuthResult) -> AuthOutcome {
    if result.success() {
        AuthOutcome::Accepted
    } else {
        AuthOutcome::Rejected
    }
}

#[async_trait]
impl Authenticator for HandleAuthenticator<'_> {
    async fn attempt(&mut self, username: &str, step: &AuthStep) -> Result<AuthOutcome, SshError> {
        match step {
            AuthStep::Certificate(cert) => {
                let key = russh::keys::load_secret_key(expand_tilde(&cert.key_path), cert.passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;
                let certificate = russh::keys::load_openssh_certificate(expand_tilde(&cert.cert_path))
                    .map_err(|e| SshError::CertificateParseError(e.to_string()))?;
                let result = self
                    .handle
                    .authenticate_openssh_cert(username, Arc::new(key), certificate)
                    .await?;
                Ok(outcome(result))
            }
            AuthStep::PublicKey(key_file) => {
                let key = russh::keys::load_secret_key(expand_tilde(&key_file.key_path), key_file.passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                let result = self.handle.authenticate_publickey(username, key_with_hash).await?;
                Ok(outcome(result))
            }
            AuthStep::Agent => {
                let mut agent = SshAgentClient::connect().await?;
                agent.try_identities(self.handle, username).await
            }
            AuthStep::Password(password) => {
                let result = self.handle.authenticate_password(username, password).await?;
                Ok(outcome(result))
            }
        }
    }
}

/// Dials hops with russh, keeping each authenticated handle in an owner task
#[derive(Debug, Clone)]
pub struct SshDialer {
    timeout: Duration,
    keepalive: Duration,
}

impl SshDialer {
    pub fn new(timeout: Duration, keepalive: Duration) -> Self {
        Self { timeout, keepalive }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            keepalive: self.keepalive,
        }
    }

    /// Connect and authenticate, returning the concrete session
    pub async fn dial_ssh(&self, hop: &HopDescriptor, via: Option<BoxedStream>) -> Result<SshHop, SshError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive),
            keepalive_max: 3,
            ..Default::default()
        });
        let handler = ClientHandler::new(hop.hostname.clone(), hop.port);
        let addr = format!("{}:{}", hop.hostname, hop.port);

        let connect = async move {
            match via {
                Some(stream) => client::connect_stream(config, stream, handler).await,
                None => client::connect(config, (hop.hostname.as_str(), hop.port), handler).await,
            }
        };

        let mut handle = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
            .map_err(|e| SshError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        debug!("SSH handshake with {} completed", addr);

        let mut authenticator = HandleAuthenticator { handle: &mut handle };
        authenticate(&mut authenticator, &hop.username, &hop.auth).await?;

        let label = hop.display_name().to_string();
        let controller = spawn_handle_owner_task(handle, label.clone());
        Ok(SshHop { label, controller })
    }
}

#[async_trait]
impl HopDialer for SshDialer {
    async fn dial(&self, hop: &HopDescriptor, via: Option<BoxedStream>) -> Result<LiveHop, SshError> {
        Ok(Box::new(self.dial_ssh(hop, via).await?))
    }
}

/// Authenticated session on one host
pub struct SshHop {
    label: String,
    controller: HandleController,
}

impl SshHop {
    pub fn controller(&self) -> &HandleController {
        &self.controller
    }
}

#[async_trait]
impl HopSession for SshHop {
    fn label(&self) -> &str {
        &self.label
    }

    async fn open_tunnel(&self, host: &str, port: u16) -> Result<BoxedStream, SshError> {
        let channel = self
            .controller
            .open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn teardown(self: Box<Self>) -> Result<(), SshError> {
        info!("Closing SSH session on {}", self.label);
        self.controller.disconnect().await
    }
}
