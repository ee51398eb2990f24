//! MySQL liveness probe: reads the initial handshake packet and checks its
//! shape (a 3-byte little-endian length + sequence header, then a
//! plausible protocol version byte and a NUL-terminated server version
//! string). No authentication is attempted — observing a well-formed
//! handshake is sufficient evidence of liveness.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    let mut header = [0u8; 4];
    read_exact(transport, &mut header).await?;
    let len = (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
    if len == 0 || len > 4096 {
        return Err(ProbeFailure::ProtocolMismatch(format!("implausible handshake packet length {len}")));
    }

    let mut body = vec![0u8; len];
    read_exact(transport, &mut body).await?;

    let protocol_version = *body
        .first()
        .ok_or_else(|| ProbeFailure::ProtocolMismatch("empty handshake packet".into()))?;
    if protocol_version < 9 {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "unexpected protocol version byte {protocol_version}"
        )));
    }

    let version_end = body[1..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProbeFailure::ProtocolMismatch("server version string was not NUL-terminated".into()))?;
    if version_end == 0 {
        return Err(ProbeFailure::ProtocolMismatch("empty server version string".into()));
    }
    Ok(())
}

async fn read_exact(transport: &mut Transport, buf: &mut [u8]) -> Result<(), ProbeFailure> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read_bytes(&mut buf[filled..], buf.len() - filled).await?;
        if n == 0 {
            return Err(ProbeFailure::ProtocolMismatch("connection closed mid-handshake".into()));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    fn handshake_packet() -> Vec<u8> {
        let mut body = vec![0x0A]; // protocol version 10
        body.extend_from_slice(b"8.0.34\0");
        body.extend_from_slice(&[0, 0, 0, 1]); // thread id, truncated for the test
        let len = body.len();
        let mut packet = vec![(len & 0xFF) as u8, ((len >> 8) & 0xFF) as u8, ((len >> 16) & 0xFF) as u8, 0];
        packet.extend(body);
        packet
    }

    #[tokio::test]
    async fn well_formed_handshake_accepted() {
        let mut t = mock_transport(&handshake_packet());
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_protocol_version_rejected() {
        let mut packet = vec![2, 0, 0, 0, 0x01, 0x00];
        packet[0] = 2; // length = 2
        let mut t = mock_transport(&packet);
        assert!(check(&mut t).await.is_err());
    }
}
