//! Redis liveness probe: issues `PING` as a RESP inline command and
//! requires a `+PONG` simple-string reply.

use super::common::send_expect;
use super::common::ProbeResult;
use crate::transport::Transport;

const MAX_LINE: usize = 256;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    send_expect(transport, "PING\r\n", MAX_LINE, "+PONG").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn pong_reply_accepted() {
        let mut t = mock_transport(b"+PONG\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn error_reply_rejected() {
        let mut t = mock_transport(b"-NOAUTH Authentication required.\r\n");
        assert!(check(&mut t).await.is_err());
    }
}
