//! IMAP liveness probe (spec §4.C, normative byte sequence).
//!
//! Read greeting, require `* OK` (case-insensitive); send `001 LOGOUT\r\n`;
//! require the response to start with `* BYE`.

use super::common::{expect_prefix, ProbeResult};
use crate::transport::Transport;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    expect_prefix(transport, 512, "* OK").await?;
    transport.print("001 LOGOUT\r\n").await?;
    expect_prefix(transport, 512, "* BYE").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn greeting_and_logout_accepted() {
        let mut t = mock_transport(b"* OK IMAP4rev1 Service Ready\r\n* BYE logging out\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn bad_greeting_is_rejected() {
        let mut t = mock_transport(b"* NO bad\r\n");
        let err = check(&mut t).await.unwrap_err();
        assert!(err.to_string().contains("* OK"));
    }
}
