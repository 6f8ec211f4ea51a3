//! SSH Error types

use thiserror::Error;

/// Reply codes a SOCKS5 server may send in answer to CONNECT (RFC 1928 §6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5Failure {
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unknown(u8),
}

impl Socks5Failure {
    pub fn from_reply(code: u8) -> Self {
        match code {
            0x01 => Self::GeneralFailure,
            0x02 => Self::NotAllowed,
            0x03 => Self::NetworkUnreachable,
            0x04 => Self::HostUnreachable,
            0x05 => Self::ConnectionRefused,
            0x06 => Self::TtlExpired,
            0x07 => Self::CommandNotSupported,
            0x08 => Self::AddressTypeNotSupported,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for Socks5Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeneralFailure => write!(f, "general SOCKS server failure"),
            Self::NotAllowed => write!(f, "connection not allowed by ruleset"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TtlExpired => write!(f, "TTL expired"),
            Self::CommandNotSupported => write!(f, "command not supported"),
            Self::AddressTypeNotSupported => write!(f, "address type not supported"),
            Self::Unknown(code) => write!(f, "unknown reply code 0x{:02x}", code),
        }
    }
}

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Proxy handshake failed: {0}")]
    ProxyHandshake(String),

    #[error("SOCKS5 proxy refused CONNECT: {0}")]
    Socks5Rejected(Socks5Failure),

    #[error("Jump host {hop} ({label}) rejected credentials: {reason}")]
    ChainAuth {
        /// 1-based position in the chain
        hop: usize,
        label: String,
        reason: String,
    },

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Certificate parse error: {0}")]
    CertificateParseError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("SSH Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("SSH Agent error: {0}")]
    AgentError(String),
}

impl SshError {
    /// True for proxy-level failures (HTTP CONNECT or SOCKS5)
    pub fn is_proxy_error(&self) -> bool {
        matches!(self, SshError::ProxyHandshake(_) | SshError::Socks5Rejected(_))
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
