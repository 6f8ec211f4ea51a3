//! Connection descriptors
//!
//! These are the wire-level inputs toward the transport substrate: the final
//! target, the ordered jump-host chain in front of it, and an optional forward
//! proxy in front of the first hop.

use serde::{Deserialize, Serialize};

/// Kind of forward proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

/// Forward proxy sitting in front of the first SSH hop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyDescriptor {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Http,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Socks5,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Username/password pair, only when a non-empty username is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => {
                Some((user, self.password.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }
}

/// Private key on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub key_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// OpenSSH certificate plus its private key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateFile {
    pub key_path: String,
    pub cert_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Resolved authentication material for one host.
///
/// Opaque to the engine: it is handed over by the credential store and only
/// interpreted by [`super::auth`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<KeyFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateFile>,
    /// Try keys held by the system SSH agent
    #[serde(default)]
    pub use_agent: bool,
}

impl AuthMaterial {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            private_key: Some(KeyFile {
                key_path: key_path.into(),
                passphrase,
            }),
            ..Default::default()
        }
    }

    pub fn agent() -> Self {
        Self {
            use_agent: true,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// One link in a jump-host chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopDescriptor {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMaterial,
    #[serde(default)]
    pub label: String,
}

impl HopDescriptor {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>, auth: AuthMaterial) -> Self {
        let hostname = hostname.into();
        Self {
            label: hostname.clone(),
            hostname,
            port: 22,
            username: username.into(),
            auth,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.hostname
        } else {
            &self.label
        }
    }
}

/// Final SSH target together with the route used to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMaterial,
    #[serde(default)]
    pub label: String,
    /// Jump hosts, in connection order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<HopDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyDescriptor>,
    /// Per-handshake timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl HostDescriptor {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>, auth: AuthMaterial) -> Self {
        let hostname = hostname.into();
        Self {
            label: hostname.clone(),
            hostname,
            port: 22,
            username: username.into(),
            auth,
            hops: Vec::new(),
            proxy: None,
            timeout_secs: default_timeout(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn via(mut self, hop: HopDescriptor) -> Self {
        self.hops.push(hop);
        self
    }

    pub fn through_proxy(mut self, proxy: ProxyDescriptor) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// The final target expressed as a hop, for dialing over the chain's stream
    pub fn as_hop(&self) -> HopDescriptor {
        HopDescriptor {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            auth: self.auth.clone(),
            label: self.label.clone(),
        }
    }

    pub fn display_label(&self) -> String {
        if self.label.is_empty() || self.label == self.hostname {
            format!("{}@{}", self.username, self.hostname)
        } else {
            self.label.clone()
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_descriptor_builder() {
        let host = HostDescriptor::new("db.internal", "deploy", AuthMaterial::agent())
            .port(2222)
            .via(HopDescriptor::new("bastion.example.com", "jump", AuthMaterial::password("pw")))
            .through_proxy(ProxyDescriptor::socks5("127.0.0.1", 1080));

        assert_eq!(host.port, 2222);
        assert_eq!(host.hops.len(), 1);
        assert_eq!(host.hops[0].port, 22);
        assert_eq!(host.hops[0].display_name(), "bastion.example.com");
        assert_eq!(host.display_label(), "deploy@db.internal");
        assert_eq!(host.as_hop().port, 2222);
    }

    #[test]
    fn test_proxy_credentials_require_username() {
        let anon = ProxyDescriptor::http("proxy", 3128);
        assert!(anon.credentials().is_none());

        let mut empty_user = ProxyDescriptor::http("proxy", 3128);
        empty_user.username = Some(String::new());
        assert!(empty_user.credentials().is_none());

        let authed = ProxyDescriptor::http("proxy", 3128).with_credentials("alice", "s3cret");
        assert_eq!(authed.credentials(), Some(("alice", "s3cret")));
    }

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let json = r#"{
            "hostname": "files.example.com",
            "username": "bob",
            "auth": { "password": "pw" },
            "proxy": { "kind": "http", "host": "proxy.local", "port": 8080 }
        }"#;
        let host: HostDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(host.port, 22);
        assert_eq!(host.timeout_secs, 30);
        assert!(host.hops.is_empty());
        assert_eq!(host.proxy.unwrap().kind, ProxyKind::Http);
        assert_eq!(host.auth.password.as_deref(), Some("pw"));
    }
}
