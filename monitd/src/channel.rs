//! # Control channel listener (component G, daemon side)
//!
//! Accepts the HTTP/1.0-shaped requests `monit_core::channel` defines,
//! over TCP (optionally TLS) or a UNIX domain socket, and turns each one
//! into a [`monit_core::control::Engine::control`] call. One task per
//! connection, mirroring the accept-loop-plus-spawn shape the teacher's
//! `servers` binaries use around `TcpListener::accept`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex as AsyncMutex;

use monit_core::channel::{self, ChannelError};
use monit_core::control::{ControlAction, Engine};
use monit_core::model::ServiceGraph;
use monit_core::tls::TlsServerContext;
use monit_core::transport::Transport;

use crate::config::ControlSettings;

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_BYTES: usize = 8192;

/// Listens for control-channel connections and dispatches them against
/// `engine`. Holds its own read-only view of the graph only to resolve
/// `all` (spec: actions may target a single service or every known one).
pub struct ControlChannelListener {
    settings: ControlSettings,
    tls: Option<TlsServerContext>,
    graph: Arc<AsyncMutex<ServiceGraph>>,
    engine: Arc<Engine>,
}

impl ControlChannelListener {
    pub fn new(settings: ControlSettings, tls: Option<TlsServerContext>, graph: Arc<AsyncMutex<ServiceGraph>>, engine: Arc<Engine>) -> Self {
        Self { settings, tls, graph, engine }
    }

    /// Runs the accept loop until the process is asked to stop. Binds
    /// `unix_socket` if given and `bind` is absent; `bind` takes priority
    /// when both are configured (see [`ControlSettings`]).
    pub async fn serve(self) -> io::Result<()> {
        let this = Arc::new(self);
        if let Some(addr) = this.settings.bind.clone() {
            let listener = TcpListener::bind(&addr).await?;
            tracing::info!(addr, "control channel listening");
            loop {
                let (stream, peer) = listener.accept().await?;
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    let tls = this.tls.as_ref();
                    match Transport::from_accepted(stream, peer, tls, REQUEST_READ_TIMEOUT.as_millis() as u64).await {
                        Ok(mut transport) => this.handle_connection(&mut transport).await,
                        Err(e) => tracing::warn!(error = %e, "control channel handshake failed"),
                    }
                });
            }
        } else if let Some(path) = this.settings.unix_socket.clone() {
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            tracing::info!(path = %path.display(), "control channel listening (unix)");
            loop {
                let (stream, _) = listener.accept().await?;
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_unix_connection(stream).await;
                });
            }
        } else {
            tracing::warn!("no control channel bind address or unix socket configured; control channel disabled");
            Ok(())
        }
    }

    async fn handle_connection(&self, transport: &mut Transport) {
        let raw = match read_request(transport).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read control channel request");
                return;
            }
        };
        let response = self.dispatch(&raw).await;
        if let Err(e) = transport.write_bytes(response.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write control channel response");
        }
    }

    async fn handle_unix_connection(&self, mut stream: tokio::net::UnixStream) {
        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        let read = match tokio::time::timeout(REQUEST_READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            _ => {
                tracing::warn!("failed to read control channel request over unix socket");
                return;
            }
        };
        let raw = String::from_utf8_lossy(&buf[..read]).into_owned();
        let response = self.dispatch(&raw).await;
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write control channel response over unix socket");
        }
    }

    async fn dispatch(&self, raw: &str) -> String {
        let request = match channel::parse_request(raw, &self.settings.username, &self.settings.password) {
            Ok(req) => req,
            Err(ChannelError::Unauthorized) => return channel::format_response(false, "unauthorized"),
            Err(e) => return channel::format_response(false, &e.to_string()),
        };

        let outcome = if request.service == "all" {
            self.control_all(request.action).await
        } else {
            self.engine.control(&request.service, request.action).await.map_err(|e| e.to_string())
        };

        match outcome {
            Ok(()) => channel::format_response(true, &format!("action '{}' applied to '{}'", verb(request.action), request.service)),
            Err(message) => channel::format_response(false, &message),
        }
    }

    async fn control_all(&self, action: ControlAction) -> Result<(), String> {
        let names: Vec<String> = self.graph.lock().await.services.keys().cloned().collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.engine.control(&name, action).await {
                failures.push(format!("{name}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

fn verb(action: ControlAction) -> &'static str {
    match action {
        ControlAction::Start => "start",
        ControlAction::Stop => "stop",
        ControlAction::Restart => "restart",
        ControlAction::Monitor => "monitor",
        ControlAction::Unmonitor => "unmonitor",
    }
}

/// Reads a request off `transport` until the blank line plus
/// `Content-Length` bytes have arrived, bounded to [`MAX_REQUEST_BYTES`].
async fn read_request(transport: &mut Transport) -> Result<String, monit_core::TransportError> {
    let mut raw = String::new();
    loop {
        let line = transport.read_line(512).await?;
        let done = line == "\r\n" || line.is_empty();
        raw.push_str(&line);
        if done || raw.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    let content_length = raw
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > 0 {
        let mut body = vec![0u8; content_length.min(MAX_REQUEST_BYTES)];
        let n = transport.read_bytes(&mut body, body.len()).await?;
        raw.push_str(&String::from_utf8_lossy(&body[..n]));
    }
    Ok(raw)
}
