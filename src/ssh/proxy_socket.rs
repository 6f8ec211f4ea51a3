//! Forward proxy handshakes (HTTP CONNECT and SOCKS5)
//!
//! Produces a raw byte stream to `target_host:target_port` tunneled through a
//! forward proxy. The stream carries no application-layer authentication:
//! callers run the SSH handshake on top of it.
//!
//! ```text
//! Client --TCP--> [Proxy] --CONNECT host:port--> [Target sshd]
//! ```
//!
//! Both handshakes are written against any `AsyncRead + AsyncWrite` so they
//! can run over a TCP socket or an in-memory pipe.

use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::config::{ProxyDescriptor, ProxyKind};
use super::error::{Socks5Failure, SshError};

/// Any duplex byte stream usable as an SSH transport
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased transport (TCP socket, proxied socket, or forwarded SSH channel)
pub type BoxedStream = Box<dyn TransportStream>;

/// Upper bound for an HTTP CONNECT response header block
const MAX_HTTP_HEADER: usize = 8 * 1024;

/// SOCKS5 protocol constants
mod socks5 {
    pub const VERSION: u8 = 0x05;
    pub const AUTH_NONE: u8 = 0x00;
    pub const AUTH_USER_PASS: u8 = 0x02;
    pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
    pub const USER_PASS_VERSION: u8 = 0x01;
    pub const CMD_CONNECT: u8 = 0x01;
    pub const RSV: u8 = 0x00;
    pub const ATYP_IPV4: u8 = 0x01;
    pub const ATYP_DOMAIN: u8 = 0x03;
    pub const ATYP_IPV6: u8 = 0x04;
    pub const REP_SUCCESS: u8 = 0x00;
}

/// Open a TCP connection to the proxy and tunnel it to the target
pub async fn connect_through_proxy(
    proxy: &ProxyDescriptor,
    target_host: &str,
    target_port: u16,
) -> Result<BoxedStream, SshError> {
    info!(
        "Connecting to {}:{} via {:?} proxy {}:{}",
        target_host, target_port, proxy.kind, proxy.host, proxy.port
    );

    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(|e| {
            SshError::ConnectionFailed(format!(
                "Failed to connect to proxy {}:{}: {}",
                proxy.host, proxy.port, e
            ))
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY on proxy socket: {}", e);
    }

    match proxy.kind {
        ProxyKind::Http => {
            http_connect(&mut stream, target_host, target_port, proxy.credentials()).await?
        }
        ProxyKind::Socks5 => {
            socks5_connect(&mut stream, target_host, target_port, proxy.credentials()).await?
        }
    }

    info!("Proxy tunnel to {}:{} established", target_host, target_port);
    Ok(Box::new(stream))
}

/// Build the CONNECT request bytes
pub fn build_http_connect_request(
    target_host: &str,
    target_port: u16,
    credentials: Option<(&str, &str)>,
) -> String {
    let authority = format!("{}:{}", target_host, target_port);
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((user, pass)) = credentials {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    request
}

/// Parse the status code out of an HTTP status line
fn parse_status_code(status_line: &str) -> Result<u16, SshError> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(SshError::ProxyHandshake(format!(
            "Malformed status line from HTTP proxy: {:?}",
            status_line
        )));
    }
    parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            SshError::ProxyHandshake(format!(
                "Missing status code in HTTP proxy response: {:?}",
                status_line
            ))
        })
}

/// Perform an HTTP CONNECT handshake over `stream`.
///
/// Reads the response one byte at a time so nothing past the blank line is
/// consumed: the SSH server banner may follow immediately.
pub async fn http_connect<S>(
    stream: &mut S,
    target_host: &str,
    target_port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<(), SshError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_http_connect_request(target_host, target_port, credentials);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut header = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_HTTP_HEADER {
            return Err(SshError::ProxyHandshake(format!(
                "HTTP proxy response exceeds {} bytes",
                MAX_HTTP_HEADER
            )));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(SshError::ProxyHandshake(
                "HTTP proxy closed the connection before completing the response".into(),
            ));
        }
        header.push(byte[0]);
    }

    let text = String::from_utf8_lossy(&header);
    let status_line = text.lines().next().unwrap_or_default();
    let code = parse_status_code(status_line)?;
    debug!("HTTP proxy answered: {}", status_line);

    if !(200..300).contains(&code) {
        return Err(SshError::ProxyHandshake(format!(
            "HTTP proxy refused CONNECT to {}:{}: {}",
            target_host,
            target_port,
            status_line.trim()
        )));
    }
    Ok(())
}

/// Perform a SOCKS5 CONNECT handshake (domain-name address) over `stream`
pub async fn socks5_connect<S>(
    stream: &mut S,
    target_host: &str,
    target_port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<(), SshError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if target_host.is_empty() || target_host.len() > 255 {
        return Err(SshError::ProxyHandshake(format!(
            "Target host name length {} is not encodable in SOCKS5",
            target_host.len()
        )));
    }

    // Phase 1: method negotiation
    let greeting: &[u8] = if credentials.is_some() {
        &[socks5::VERSION, 2, socks5::AUTH_NONE, socks5::AUTH_USER_PASS]
    } else {
        &[socks5::VERSION, 1, socks5::AUTH_NONE]
    };
    stream.write_all(greeting).await?;

    let mut reply = [0u8; 2];
    read_exact_or_handshake_error(stream, &mut reply, "method selection").await?;
    if reply[0] != socks5::VERSION {
        return Err(SshError::ProxyHandshake(format!(
            "Unexpected SOCKS version in method selection: 0x{:02x}",
            reply[0]
        )));
    }

    match reply[1] {
        socks5::AUTH_NONE => debug!("SOCKS5 proxy selected no-auth"),
        socks5::AUTH_USER_PASS => {
            let (user, pass) = credentials.ok_or_else(|| {
                SshError::ProxyHandshake(
                    "SOCKS5 proxy demanded username/password but none were offered".into(),
                )
            })?;
            socks5_user_pass(stream, user, pass).await?;
        }
        socks5::AUTH_NO_ACCEPTABLE => {
            return Err(SshError::ProxyHandshake(
                "SOCKS5 proxy accepted none of the offered authentication methods".into(),
            ));
        }
        other => {
            return Err(SshError::ProxyHandshake(format!(
                "SOCKS5 proxy selected unsupported method 0x{:02x}",
                other
            )));
        }
    }

    // Phase 2: CONNECT request
    let mut request = Vec::with_capacity(7 + target_host.len());
    request.extend_from_slice(&[
        socks5::VERSION,
        socks5::CMD_CONNECT,
        socks5::RSV,
        socks5::ATYP_DOMAIN,
        target_host.len() as u8,
    ]);
    request.extend_from_slice(target_host.as_bytes());
    request.extend_from_slice(&target_port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    read_exact_or_handshake_error(stream, &mut head, "CONNECT reply").await?;
    if head[0] != socks5::VERSION {
        return Err(SshError::ProxyHandshake(format!(
            "Unexpected SOCKS version in CONNECT reply: 0x{:02x}",
            head[0]
        )));
    }
    if head[1] != socks5::REP_SUCCESS {
        return Err(SshError::Socks5Rejected(Socks5Failure::from_reply(head[1])));
    }

    // Consume BND.ADDR + BND.PORT so the stream is positioned at tunnel data
    let remaining = match head[3] {
        socks5::ATYP_IPV4 => 4 + 2,
        socks5::ATYP_IPV6 => 16 + 2,
        socks5::ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read_exact_or_handshake_error(stream, &mut len, "bound address length").await?;
            len[0] as usize + 2
        }
        other => {
            return Err(SshError::ProxyHandshake(format!(
                "Unknown address type 0x{:02x} in SOCKS5 reply",
                other
            )));
        }
    };
    let mut bound = vec![0u8; remaining];
    read_exact_or_handshake_error(stream, &mut bound, "bound address").await?;

    debug!("SOCKS5 tunnel to {}:{} ready", target_host, target_port);
    Ok(())
}

/// RFC 1929 username/password sub-negotiation
async fn socks5_user_pass<S>(stream: &mut S, user: &str, pass: &str) -> Result<(), SshError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if user.len() > 255 || pass.len() > 255 {
        return Err(SshError::ProxyHandshake(
            "SOCKS5 username and password must each be at most 255 bytes".into(),
        ));
    }
    let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
    msg.push(socks5::USER_PASS_VERSION);
    msg.push(user.len() as u8);
    msg.extend_from_slice(user.as_bytes());
    msg.push(pass.len() as u8);
    msg.extend_from_slice(pass.as_bytes());
    stream.write_all(&msg).await?;

    let mut status = [0u8; 2];
    read_exact_or_handshake_error(stream, &mut status, "authentication status").await?;
    if status[1] != 0x00 {
        return Err(SshError::ProxyHandshake(
            "SOCKS5 proxy rejected username/password".into(),
        ));
    }
    Ok(())
}

async fn read_exact_or_handshake_error<S>(
    stream: &mut S,
    buf: &mut [u8],
    what: &str,
) -> Result<(), SshError>
where
    S: AsyncRead + Unpin,
{
    stream.read_exact(buf).await.map(|_| ()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SshError::ProxyHandshake(format!("SOCKS5 proxy closed the connection during {}", what))
        } else {
            SshError::IoError(e)
        }
    })
}
