//! Generic byte-string probe (spec §4.C): for protocols monit doesn't know
//! natively, a service can configure a literal string to send and a
//! literal prefix to expect back. This is the escape hatch underneath
//! every named protocol probe.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

/// `send` and `expect` are raw bytes straight from configuration: `send`
/// is written verbatim (no implicit `\r\n`), `expect` is matched as a
/// byte-prefix of whatever comes back, not a line.
pub async fn check(transport: &mut Transport, send: &[u8], expect: &[u8]) -> ProbeResult {
    if !send.is_empty() {
        transport.write_bytes(send).await?;
    }
    if expect.is_empty() {
        return Ok(());
    }

    let mut buf = vec![0u8; expect.len()];
    let n = transport.read_bytes(&mut buf, expect.len()).await?;
    if &buf[..n] == expect {
        Ok(())
    } else {
        Err(ProbeFailure::ProtocolMismatch(format!(
            "expected reply to start with {expect:?}, got {:?}",
            &buf[..n]
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn matching_prefix_accepted() {
        let mut t = mock_transport(b"READY\r\n");
        assert!(check(&mut t, b"PING\r\n", b"READY").await.is_ok());
    }

    #[tokio::test]
    async fn mismatched_prefix_rejected() {
        let mut t = mock_transport(b"NOPE\r\n");
        assert!(check(&mut t, b"PING\r\n", b"READY").await.is_err());
    }

    #[tokio::test]
    async fn empty_expect_always_succeeds_after_send() {
        let mut t = mock_transport(b"");
        assert!(check(&mut t, b"PING\r\n", b"").await.is_ok());
    }
}
