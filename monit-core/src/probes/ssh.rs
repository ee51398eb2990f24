//! SSH liveness probe: reads the server's identification line (RFC 4253
//! §4.2, `SSH-protoversion-softwareversion ...\r\n`) and checks it starts
//! with `SSH-`. No key exchange is attempted; the banner alone proves an
//! SSH daemon is listening and speaking the protocol.

use super::common::expect_prefix;
use super::common::ProbeResult;

const MAX_BANNER_LEN: usize = 255;

pub async fn check(transport: &mut crate::transport::Transport) -> ProbeResult {
    expect_prefix(transport, MAX_BANNER_LEN, "SSH-").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn openssh_banner_accepted() {
        let mut t = mock_transport(b"SSH-2.0-OpenSSH_9.6\r\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn non_ssh_banner_rejected() {
        let mut t = mock_transport(b"220 some-ftp-banner\r\n");
        assert!(check(&mut t).await.is_err());
    }
}
