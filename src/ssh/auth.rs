//! Per-host authentication ordering
//!
//! A host may carry several credentials at once. Key-based methods
//! (certificate, private key, agent) run first; password runs last. A method
//! the server *rejects* falls through to the next one. Any other error (a key
//! that cannot be loaded, an unreachable agent, a broken transport) aborts
//! immediately without trying the remaining methods.

use async_trait::async_trait;
use tracing::{debug, info};

use super::config::{AuthMaterial, CertificateFile, KeyFile};
use super::error::SshError;

/// One authentication attempt
#[derive(Debug, Clone)]
pub enum AuthStep {
    Certificate(CertificateFile),
    PublicKey(KeyFile),
    Agent,
    Password(String),
}

impl AuthStep {
    pub fn name(&self) -> &'static str {
        match self {
            AuthStep::Certificate(_) => "certificate",
            AuthStep::PublicKey(_) => "publickey",
            AuthStep::Agent => "agent",
            AuthStep::Password(_) => "password",
        }
    }
}

/// Server verdict for a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
}

/// Something that can run an [`AuthStep`] against a live transport
#[async_trait]
pub trait Authenticator: Send {
    async fn attempt(&mut self, username: &str, step: &AuthStep) -> Result<AuthOutcome, SshError>;
}

/// Order the available methods: certificate, key, agent, then password
pub fn plan(material: &AuthMaterial) -> Vec<AuthStep> {
    let mut steps = Vec::with_capacity(4);
    if let Some(cert) = &material.certificate {
        steps.push(AuthStep::Certificate(cert.clone()));
    }
    if let Some(key) = &material.private_key {
        steps.push(AuthStep::PublicKey(key.clone()));
    }
    if material.use_agent {
        steps.push(AuthStep::Agent);
    }
    if let Some(password) = &material.password {
        steps.push(AuthStep::Password(password.clone()));
    }
    steps
}

/// Run the planned methods until one is accepted.
///
/// Fails with `AuthenticationFailed` when every method was rejected or when
/// no material was supplied at all.
pub async fn authenticate<A>(
    authenticator: &mut A,
    username: &str,
    material: &AuthMaterial,
) -> Result<(), SshError>
where
    A: Authenticator + ?Sized,
{
    let steps = plan(material);
    if steps.is_empty() {
        return Err(SshError::AuthenticationFailed(format!(
            "No authentication material for user {}",
            username
        )));
    }

    let mut rejected = Vec::with_capacity(steps.len());
    for step in &steps {
        debug!("Trying {} authentication for {}", step.name(), username);
        match authenticator.attempt(username, step).await? {
            AuthOutcome::Accepted => {
                info!("Authenticated {} with {}", username, step.name());
                return Ok(());
            }
            AuthOutcome::Rejected => {
                debug!("{} authentication rejected for {}", step.name(), username);
                rejected.push(step.name());
            }
        }
    }

    Err(SshError::AuthenticationFailed(format!(
        "Server rejected {} for user {}",
        rejected.join(", "),
        username
    )))
}

/// Expand a leading `~` so key paths work with `russh::keys`
pub fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    }
    path.to_string()
}
