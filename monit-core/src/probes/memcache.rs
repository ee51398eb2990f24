//! memcached liveness probe: the classic `version\r\n` → `VERSION ...\r\n`
//! exchange used by every memcache-compatible server.

use super::common::send_expect;
use super::common::ProbeResult;
use crate::transport::Transport;

const MAX_LINE: usize = 256;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    send_expect(transport, "version\r\n", MAX_LINE, "VERSION").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn version_reply_accepted() {
        let mut t = mock_transport(b"VERSION 1.6.21\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn error_reply_rejected() {
        let mut t = mock_transport(b"ERROR\r\n");
        assert!(check(&mut t).await.is_err());
    }
}
