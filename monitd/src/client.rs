//! # Control channel client
//!
//! What a bare `monitd start web` invocation actually does: connect to an
//! already-running daemon's control channel and issue one request, rather
//! than re-parsing the config and acting locally. Mirrors
//! `monitd::channel`'s wire handling from the opposite end.

use std::time::Duration;

use monit_core::channel;
use monit_core::control::ControlAction;
use monit_core::transport::{Family, SocketKind, Transport};

use crate::config::ControlSettings;

const CLIENT_TIMEOUT_MS: u64 = 10_000;

/// Sends one `service`+`action` request to the daemon described by
/// `settings` and returns the daemon's verdict.
pub async fn send(settings: &ControlSettings, service: &str, action: ControlAction) -> Result<(), String> {
    let mut transport = connect(settings).await?;

    let request = channel::format_request(service, action, &settings.username, &settings.password);
    transport.write_bytes(request.as_bytes()).await.map_err(|e| e.to_string())?;
    transport.shutdown_write().await.ok();

    let mut raw = String::new();
    let mut buf = [0u8; 1024];
    loop {
        match transport.read_bytes(&mut buf, buf.len()).await {
            Ok(0) => break,
            Ok(n) => raw.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(_) => break,
        }
        if raw.len() > channel::MAX_RESPONSE_BODY * 4 {
            break;
        }
    }

    channel::parse_response(&raw)
}

async fn connect(settings: &ControlSettings) -> Result<Transport, String> {
    if let Some(addr) = &settings.bind {
        let (host, port) = addr
            .rsplit_once(':')
            .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h, p)))
            .ok_or_else(|| format!("invalid control channel address '{addr}'"))?;
        Transport::connect(host, port, SocketKind::Tcp, Family::Auto, None, CLIENT_TIMEOUT_MS)
            .await
            .map_err(|e| e.to_string())
    } else if let Some(path) = &settings.unix_socket {
        Transport::connect_unix(&path.to_string_lossy(), CLIENT_TIMEOUT_MS)
            .await
            .map_err(|e| e.to_string())
    } else {
        Err("no control channel address configured".to_string())
    }
}

/// Convenience wrapper used by `main` for a bounded overall attempt,
/// independent of the per-read timeout already enforced by `Transport`.
pub async fn send_with_timeout(settings: &ControlSettings, service: &str, action: ControlAction) -> Result<(), String> {
    match tokio::time::timeout(Duration::from_millis(CLIENT_TIMEOUT_MS * 2), send(settings, service, action)).await {
        Ok(result) => result,
        Err(_) => Err("timed out waiting for the daemon to respond".to_string()),
    }
}
