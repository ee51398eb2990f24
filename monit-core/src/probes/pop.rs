//! POP3 liveness probe: greeting must start with `+OK`; `QUIT\r\n` must be
//! acknowledged with `+OK`.

use super::common::{expect_prefix, ProbeResult};
use crate::transport::Transport;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    expect_prefix(transport, 512, "+OK").await?;
    transport.print("QUIT\r\n").await?;
    expect_prefix(transport, 512, "+OK").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn greeting_and_quit_accepted() {
        let mut t = mock_transport(b"+OK POP3 ready\r\n+OK bye\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn bad_greeting_rejected() {
        let mut t = mock_transport(b"-ERR locked\r\n");
        assert!(check(&mut t).await.is_err());
    }
}
