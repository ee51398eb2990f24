//! SMTP liveness probe: greeting must be a `220` status line; `HELO
//! localhost` must be acknowledged with `250`; `QUIT` must be acknowledged
//! with `221`.

use super::common::{expect_prefix, ProbeResult};
use crate::transport::Transport;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    expect_prefix(transport, 512, "220").await?;
    transport.print("HELO localhost\r\n").await?;
    expect_prefix(transport, 512, "250").await?;
    transport.print("QUIT\r\n").await?;
    expect_prefix(transport, 512, "221").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn full_handshake_accepted() {
        let mut t = mock_transport(b"220 mail.example.com ESMTP\r\n250 Hello\r\n221 Bye\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_non_250_helo_reply() {
        let mut t = mock_transport(b"220 mail.example.com ESMTP\r\n550 nope\r\n");
        assert!(check(&mut t).await.is_err());
    }
}
