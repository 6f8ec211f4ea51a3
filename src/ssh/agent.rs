//! SSH Agent authentication
//!
//! Delegates challenge signing to the system agent through russh's
//! [`AgentClient`].
//!
//! - **Unix**: `SSH_AUTH_SOCK` Unix domain socket
//! - **Windows**: `\\.\pipe\openssh-ssh-agent` named pipe

use std::future::Future;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::auth::AuthOutcome;
use super::client::ClientHandler;
use super::error::SshError;

/// `Signer` over a borrowed agent.
///
/// The key is cloned before the async block so the returned future owns
/// everything it touches and stays `Send`.
struct AgentSigner<'a> {
    agent: &'a mut AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

pub struct SshAgentClient {
    agent: AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>,
}

impl SshAgentClient {
    pub async fn connect() -> Result<Self, SshError> {
        #[cfg(unix)]
        {
            let agent = AgentClient::connect_env().await.map_err(|e| {
                SshError::AgentNotAvailable(format!(
                    "Failed to connect to SSH Agent: {}. Is SSH_AUTH_SOCK set?",
                    e
                ))
            })?;
            info!("Connected to SSH Agent via SSH_AUTH_SOCK");
            Ok(Self {
                agent: agent.dynamic(),
            })
        }

        #[cfg(windows)]
        {
            let agent = AgentClient::connect_named_pipe(r"\\.\pipe\openssh-ssh-agent")
                .await
                .map_err(|e| {
                    SshError::AgentNotAvailable(format!(
                        "Failed to connect to SSH Agent via named pipe: {}",
                        e
                    ))
                })?;
            info!("Connected to SSH Agent via named pipe");
            Ok(Self {
                agent: agent.dynamic(),
            })
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(SshError::AgentNotAvailable(
                "SSH Agent is not supported on this platform".to_string(),
            ))
        }
    }

    /// Offer every agent identity in turn.
    ///
    /// `Rejected` when the server refused all of them; signing failures are
    /// errors of their own.
    pub async fn try_identities(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<AuthOutcome, SshError> {
        let keys = self
            .agent
            .request_identities()
            .await
            .map_err(|e| SshError::AgentError(format!("Failed to list agent keys: {}", e)))?;

        if keys.is_empty() {
            debug!("SSH Agent holds no identities");
            return Ok(AuthOutcome::Rejected);
        }

        let mut signing_error: Option<String> = None;
        for key in &keys {
            debug!("Trying agent key: {} ({})", key.algorithm(), key.comment());
            match handle
                .authenticate_publickey_with(
                    username,
                    key.clone(),
                    None,
                    &mut AgentSigner {
                        agent: &mut self.agent,
                    },
                )
                .await
            {
                Ok(result) if result.success() => {
                    info!("Agent key accepted: {}", key.comment());
                    return Ok(AuthOutcome::Accepted);
                }
                Ok(_) => debug!("Agent key rejected by server: {}", key.comment()),
                Err(e) => {
                    warn!("Agent signing error for key {}: {}", key.comment(), e);
                    signing_error = Some(e.to_string());
                }
            }
        }

        match signing_error {
            Some(e) => Err(SshError::AgentError(e)),
            None => Ok(AuthOutcome::Rejected),
        }
    }
}
