//! Shared helpers used by several text-line protocol probes: a generic
//! send/expect round trip and prefix matching. Protocol modules call these
//! rather than re-implementing the same `write_bytes` + `read_line` dance.

use crate::error::ProbeFailure;
use crate::transport::Transport;

pub type ProbeResult = Result<(), ProbeFailure>;

/// Reads one line (bounded by `max_len`) and requires it to start with
/// `prefix` (case-insensitive). Returns the line on success.
pub async fn expect_prefix(transport: &mut Transport, max_len: usize, prefix: &str) -> Result<String, ProbeFailure> {
    let line = transport.read_line(max_len).await?;
    if line.to_ascii_uppercase().starts_with(&prefix.to_ascii_uppercase()) {
        Ok(line)
    } else {
        Err(ProbeFailure::ProtocolMismatch(format!(
            "expected a line starting with '{prefix}', got '{}'",
            line.trim_end()
        )))
    }
}

/// Writes `send`, then reads one line and requires it to start with
/// `expect_prefix_str`. The generic "send a challenge, read a response,
/// prefix-match" shape shared by IMAP/POP/FTP/SMTP-style probes.
pub async fn send_expect(
    transport: &mut Transport,
    send: &str,
    max_len: usize,
    expect_prefix_str: &str,
) -> ProbeResult {
    transport.print(send).await?;
    expect_prefix(transport, max_len, expect_prefix_str).await?;
    Ok(())
}
