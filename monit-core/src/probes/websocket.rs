//! WebSocket liveness probe: performs the RFC 6455 opening handshake
//! (client `Upgrade` request, fixed `Sec-WebSocket-Key`) and requires the
//! `101 Switching Protocols` status line with an `Upgrade: websocket`
//! header.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const SEC_WEBSOCKET_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const MAX_LINE: usize = 1024;
const MAX_HEADER_LINES: usize = 64;

pub async fn check(transport: &mut Transport, host: &str, path: &str) -> ProbeResult {
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SEC_WEBSOCKET_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    transport.print(&request).await?;

    let status_line = transport.read_line(MAX_LINE).await?;
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "expected '101 Switching Protocols', got '{}'",
            status_line.trim_end()
        )));
    }

    let mut saw_upgrade_header = false;
    for _ in 0..MAX_HEADER_LINES {
        let line = transport.read_line(MAX_LINE).await?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if trimmed.to_ascii_lowercase().starts_with("upgrade:") && trimmed.to_ascii_lowercase().contains("websocket") {
            saw_upgrade_header = true;
        }
    }

    if !saw_upgrade_header {
        return Err(ProbeFailure::ProtocolMismatch("response missing 'Upgrade: websocket' header".into()));
    }
    Ok(())
}
