//! # Transport (component A)
//!
//! A bounded, byte-oriented connection abstraction over TCP, UDP, UNIX
//! domain sockets and TLS. Every blocking-shaped call is wrapped in
//! `tokio::time::timeout` against the transport's current deadline, which
//! is the async re-expression of the "blocking read/write with
//! non-blocking sockets + should-retry" pattern called out as needing
//! re-architecture: the bounded-wait, single-error-channel contract is
//! unchanged, the implementation is not.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, UnixStream};
use tokio::time::timeout;

use crate::error::TransportError;
use crate::tls::{TlsClientContext, TlsServerContext};

/// Address family selector for outbound resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
    Auto,
}

/// Underlying socket kind requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
}

/// The concrete byte stream behind a `Transport`. UDP is connectionless but
/// modeled as "connected" via `UdpSocket::connect`, matching the way probes
/// use it (one peer per Transport).
enum Inner {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Unix(UnixStream),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    /// An in-memory duplex stream standing in for a real socket in probe
    /// unit tests (see [`test_support`]).
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
    /// Transient placeholder used only while swapping `Tcp` for
    /// `TlsClient` during `switch_to_tls`; never observed by a caller.
    Closed,
}

/// A single probe- or control-channel-scoped connection. Created, used and
/// released on all exit paths by its owner; never held across probes.
pub struct Transport {
    inner: Inner,
    timeout: Duration,
    remote: String,
    last_error: Option<String>,
    /// A small read-ahead buffer so `read_line`/`read_byte` can pull more
    /// than they need from the socket without losing the remainder.
    read_buf: Vec<u8>,
}

impl Transport {
    /// Connects to `host:port` over TCP or UDP, resolving per `family`, and
    /// completing the TCP handshake (and TLS handshake, if `tls` is given)
    /// within `timeout_ms`.
    pub async fn connect(
        host: &str,
        port: u16,
        kind: SocketKind,
        family: Family,
        tls: Option<TlsClientContext>,
        timeout_ms: u64,
    ) -> Result<Self, TransportError> {
        let deadline = Duration::from_millis(timeout_ms);
        let addr = resolve(host, port, family, deadline).await?;

        match kind {
            SocketKind::Tcp => {
                let tcp = timeout(deadline, TcpStream::connect(addr))
                    .await
                    .map_err(|_| TransportError::Timeout(deadline))?
                    .map_err(|e| map_connect_err(e, deadline))?;
                tcp.set_nodelay(true).ok();

                let inner = match tls {
                    Some(ctx) => {
                        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
                            .map_err(|_| TransportError::Resolve(host.to_string()))?;
                        let connector = tokio_rustls::TlsConnector::from(ctx.config());
                        let tls_stream = timeout(deadline, connector.connect(server_name, tcp))
                            .await
                            .map_err(|_| TransportError::Timeout(deadline))?
                            .map_err(|e| TransportError::Tls(crate::error::TlsError::Rustls(
                                rustls::Error::General(e.to_string()),
                            )))?;
                        Inner::TlsClient(Box::new(tls_stream))
                    }
                    None => Inner::Tcp(tcp),
                };

                Ok(Self {
                    inner,
                    timeout: deadline,
                    remote: format!("{host}:{port}"),
                    last_error: None,
                    read_buf: Vec::new(),
                })
            }
            SocketKind::Udp => {
                let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
                let sock = UdpSocket::bind(bind_addr).await?;
                timeout(deadline, sock.connect(addr))
                    .await
                    .map_err(|_| TransportError::Timeout(deadline))??;
                Ok(Self {
                    inner: Inner::Udp(sock),
                    timeout: deadline,
                    remote: format!("{host}:{port}"),
                    last_error: None,
                    read_buf: Vec::new(),
                })
            }
        }
    }

    /// Connects to a UNIX domain socket at `path`.
    pub async fn connect_unix(path: &str, timeout_ms: u64) -> Result<Self, TransportError> {
        let deadline = Duration::from_millis(timeout_ms);
        let stream = timeout(deadline, UnixStream::connect(path))
            .await
            .map_err(|_| TransportError::Timeout(deadline))??;
        Ok(Self {
            inner: Inner::Unix(stream),
            timeout: deadline,
            remote: path.to_string(),
            last_error: None,
            read_buf: Vec::new(),
        })
    }

    /// Wraps an already-accepted TCP connection (used by the control
    /// channel listener), optionally completing a server-side TLS
    /// handshake.
    pub async fn from_accepted(
        stream: TcpStream,
        addr: SocketAddr,
        server_tls: Option<&TlsServerContext>,
        timeout_ms: u64,
    ) -> Result<Self, TransportError> {
        let deadline = Duration::from_millis(timeout_ms);
        stream.set_nodelay(true).ok();
        let inner = match server_tls {
            Some(ctx) => {
                let acceptor = tokio_rustls::TlsAcceptor::from(ctx.config());
                let tls_stream = timeout(deadline, acceptor.accept(stream))
                    .await
                    .map_err(|_| TransportError::Timeout(deadline))?
                    .map_err(|e| {
                        TransportError::Tls(crate::error::TlsError::Rustls(rustls::Error::General(
                            e.to_string(),
                        )))
                    })?;
                Inner::TlsServer(Box::new(tls_stream))
            }
            None => Inner::Tcp(stream),
        };
        Ok(Self {
            inner,
            timeout: deadline,
            remote: addr.to_string(),
            last_error: None,
            read_buf: Vec::new(),
        })
    }

    /// The effective peer identity, for logging.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Updates the deadline applied to every subsequent call.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout = Duration::from_millis(timeout_ms);
    }

    /// Writes a formatted ASCII command, the `print(fmt, ...)` operation.
    pub async fn print(&mut self, line: &str) -> Result<(), TransportError> {
        self.write_bytes(line.as_bytes()).await
    }

    /// Writes exactly `buf` to the transport, respecting the timeout.
    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if matches!(self.inner, Inner::Closed) {
            return Err(TransportError::Closed);
        }
        let fut = async {
            match &mut self.inner {
                Inner::Tcp(s) => s.write_all(buf).await,
                Inner::Unix(s) => s.write_all(buf).await,
                Inner::TlsClient(s) => s.write_all(buf).await,
                Inner::TlsServer(s) => s.write_all(buf).await,
                Inner::Udp(s) => {
                    s.send(buf).await?;
                    Ok(())
                }
                #[cfg(test)]
                Inner::Mock(s) => s.write_all(buf).await,
                Inner::Closed => unreachable!("checked above"),
            }
        };
        timeout(self.timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(TransportError::from)
    }

    /// Reads up to `n` bytes into `buf`, returning the number of bytes
    /// actually read. A partial read at the deadline is returned as-is;
    /// the caller (a probe) decides whether that is a protocol failure.
    pub async fn read_bytes(&mut self, buf: &mut [u8], n: usize) -> Result<usize, TransportError> {
        let want = n.min(buf.len());
        if !self.read_buf.is_empty() {
            let take = want.min(self.read_buf.len());
            buf[..take].copy_from_slice(&self.read_buf[..take]);
            self.read_buf.drain(..take);
            return Ok(take);
        }
        if matches!(self.inner, Inner::Closed) {
            return Err(TransportError::Closed);
        }
        let fut = async {
            match &mut self.inner {
                Inner::Tcp(s) => s.read(&mut buf[..want]).await,
                Inner::Unix(s) => s.read(&mut buf[..want]).await,
                Inner::TlsClient(s) => s.read(&mut buf[..want]).await,
                Inner::TlsServer(s) => s.read(&mut buf[..want]).await,
                Inner::Udp(s) => s.recv(&mut buf[..want]).await,
                #[cfg(test)]
                Inner::Mock(s) => s.read(&mut buf[..want]).await,
                Inner::Closed => unreachable!("checked above"),
            }
        };
        timeout(self.timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(TransportError::from)
    }

    /// Reads exactly one byte.
    pub async fn read_byte(&mut self) -> Result<u8, TransportError> {
        let mut b = [0u8; 1];
        let n = self.read_bytes(&mut b, 1).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(b[0])
    }

    /// Reads up to `size - 1` bytes, stopping at (and including) the first
    /// `\n`. The returned `String` is always implicitly NUL-terminated by
    /// virtue of being a valid Rust string with no embedded NUL required by
    /// callers; `size` bounds how much is read from the wire.
    pub async fn read_line(&mut self, size: usize) -> Result<String, TransportError> {
        if matches!(self.inner, Inner::Udp(_)) {
            return Err(TransportError::UnsupportedForUdp);
        }
        let cap = size.saturating_sub(1).max(1);
        let mut out = Vec::with_capacity(cap.min(256));
        loop {
            if out.len() >= cap {
                break;
            }
            let mut b = [0u8; 1];
            let n = self.read_bytes(&mut b, 1).await?;
            if n == 0 {
                break;
            }
            out.push(b[0]);
            if b[0] == b'\n' {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Non-blocking readiness probe: true if at least one byte is
    /// immediately available without waiting for the full timeout.
    pub async fn is_ready(&mut self) -> bool {
        let mut b = [0u8; 1];
        match timeout(Duration::from_millis(1), async {
            match &mut self.inner {
                Inner::Tcp(s) => s.peek(&mut b).await,
                Inner::TlsClient(_) | Inner::TlsServer(_) | Inner::Unix(_) | Inner::Udp(_) => {
                    Ok(1) // peek() is unavailable on these; assume ready and let read_* time out.
                }
                #[cfg(test)]
                Inner::Mock(_) => Ok(1),
                Inner::Closed => Ok(0),
            }
        })
        .await
        {
            Ok(Ok(n)) => n > 0,
            _ => false,
        }
    }

    /// Drops any buffered, unread bytes.
    pub fn reset(&mut self) {
        self.read_buf.clear();
        self.last_error = None;
    }

    /// Half-closes the write side, signaling EOF to the peer. Not
    /// supported on UDP.
    pub async fn shutdown_write(&mut self) -> Result<(), TransportError> {
        match &mut self.inner {
            Inner::Tcp(s) => s.shutdown().await.map_err(TransportError::from),
            Inner::Unix(s) => s.shutdown().await.map_err(TransportError::from),
            Inner::TlsClient(s) => s.shutdown().await.map_err(TransportError::from),
            Inner::TlsServer(s) => s.shutdown().await.map_err(TransportError::from),
            Inner::Udp(_) => Err(TransportError::UnsupportedForUdp),
            #[cfg(test)]
            Inner::Mock(s) => s.shutdown().await.map_err(TransportError::from),
            Inner::Closed => Err(TransportError::Closed),
        }
    }

    /// Enables `TCP_NODELAY` (already the default for freshly connected
    /// transports; exposed for parity with the spec's operation list).
    pub fn set_nodelay(&self) -> Result<(), TransportError> {
        match &self.inner {
            Inner::Tcp(s) => s.set_nodelay(true).map_err(TransportError::from),
            Inner::Unix(_) | Inner::Udp(_) | Inner::TlsClient(_) | Inner::TlsServer(_) => Ok(()),
            #[cfg(test)]
            Inner::Mock(_) => Ok(()),
            Inner::Closed => Err(TransportError::Closed),
        }
    }

    /// Upgrades an already-connected plain TCP transport to TLS in place,
    /// for protocols that negotiate STARTTLS mid-session (IMAP, SMTP,
    /// LDAP, ...).
    pub async fn switch_to_tls(&mut self, ctx: TlsClientContext, host: &str) -> Result<(), TransportError> {
        let tcp = match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Tcp(tcp) => tcp,
            other => {
                self.inner = other;
                return Err(TransportError::UnsupportedForUdp);
            }
        };
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::Resolve(host.to_string()))?;
        let connector = tokio_rustls::TlsConnector::from(ctx.config());
        let tls_stream = timeout(self.timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| {
                TransportError::Tls(crate::error::TlsError::Rustls(rustls::Error::General(e.to_string())))
            })?;
        self.inner = Inner::TlsClient(Box::new(tls_stream));
        Ok(())
    }

    /// Stashes a protocol-level failure message without tearing down the
    /// transport, so probes can report `ProbeFailure` without a panic.
    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.last_error = Some(msg.into());
    }

    /// Takes (and clears) the last stashed error message, if any.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}

async fn resolve(host: &str, port: u16, family: Family, deadline: Duration) -> Result<SocketAddr, TransportError> {
    use tokio::net::lookup_host;
    let addrs: Vec<SocketAddr> = timeout(deadline, lookup_host((host, port)))
        .await
        .map_err(|_| TransportError::Timeout(deadline))?
        .map_err(|e| TransportError::Resolve(e.to_string()))?
        .collect();

    let chosen = match family {
        Family::Auto => addrs.into_iter().next(),
        Family::V4 => addrs.into_iter().find(|a| a.is_ipv4()),
        Family::V6 => addrs.into_iter().find(|a| a.is_ipv6()),
    };
    chosen.ok_or_else(|| TransportError::Resolve(host.to_string()))
}

fn map_connect_err(e: std::io::Error, deadline: Duration) -> TransportError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::ConnectionRefused => TransportError::Refused,
        ErrorKind::TimedOut => TransportError::Timeout(deadline),
        _ => TransportError::Io(e),
    }
}

/// Test-only transport construction over `tokio::io::duplex`, used by the
/// probe library's unit tests to script a mock peer's bytes without a real
/// socket (spec §8's concrete scenarios are driven this way).
#[cfg(test)]
pub mod test_support {
    use super::{Inner, Transport};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    /// Builds a `Transport` whose "peer" has already written `canned`
    /// bytes, which subsequent `read_*` calls will see. Writes made by the
    /// code under test disappear into the duplex buffer unread, which is
    /// fine for probes that don't assert on what they sent.
    pub fn mock_transport(canned: &[u8]) -> Transport {
        let (mut server, client) = tokio::io::duplex(64 * 1024);
        let canned = canned.to_vec();
        tokio::spawn(async move {
            let _ = server.write_all(&canned).await;
            // Keep `server` alive for the duration of the test so the
            // client side doesn't observe EOF before it has read the
            // canned bytes; it is dropped when the task ends.
        });
        Transport {
            inner: Inner::Mock(client),
            timeout: Duration::from_secs(2),
            remote: "mock".to_string(),
            last_error: None,
            read_buf: Vec::new(),
        }
    }

    /// Builds a `Transport` over a duplex pair, returning the far end so a
    /// test can both script reads and assert on bytes the probe writes.
    pub fn mock_transport_pair() -> (Transport, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        (
            Transport {
                inner: Inner::Mock(client),
                timeout: Duration::from_secs(2),
                remote: "mock".to_string(),
                last_error: None,
                read_buf: Vec::new(),
            },
            server,
        )
    }
}
