//! PostgreSQL liveness probe: sends an `SSLRequest` startup packet and
//! requires the single-byte `S` (SSL supported) or `N` (not supported)
//! reply defined by the wire protocol — either answer proves the backend
//! is alive and speaking the protocol.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const SSL_REQUEST_CODE: i32 = 80_877_103;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    let mut packet = Vec::with_capacity(8);
    packet.extend_from_slice(&8i32.to_be_bytes());
    packet.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    transport.write_bytes(&packet).await?;

    let reply = transport.read_byte().await?;
    match reply {
        b'S' | b'N' => Ok(()),
        other => Err(ProbeFailure::ProtocolMismatch(format!(
            "unexpected SSLRequest reply byte 0x{other:02x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn ssl_supported_reply_accepted() {
        let mut t = mock_transport(b"S");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn ssl_unsupported_reply_accepted() {
        let mut t = mock_transport(b"N");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_reply_rejected() {
        let mut t = mock_transport(b"E");
        assert!(check(&mut t).await.is_err());
    }
}
