//! NTPv3 liveness probe (spec §4.C, bit-exact). Sends a 48-byte client
//! request with byte 0 = `(LEAP_NOTSYNC << 6) | (VERSION3 << 3) |
//! MODE_CLIENT`, remainder zero, over UDP. The reply must be exactly 48
//! bytes with mode field 4 (server), version field 3, and leap field not
//! `NOTSYNC`.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const LEAP_NOTSYNC: u8 = 3;
const VERSION3: u8 = 3;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const PACKET_LEN: usize = 48;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    let mut request = [0u8; PACKET_LEN];
    request[0] = (LEAP_NOTSYNC << 6) | (VERSION3 << 3) | MODE_CLIENT;
    transport.write_bytes(&request).await?;

    let mut reply = [0u8; PACKET_LEN];
    let n = transport.read_bytes(&mut reply, PACKET_LEN).await?;
    if n != PACKET_LEN {
        return Err(ProbeFailure::ProtocolMismatch(format!("received {n} bytes, expected {PACKET_LEN}")));
    }

    let leap = (reply[0] >> 6) & 0x03;
    let version = (reply[0] >> 3) & 0x07;
    let mode = reply[0] & 0x07;

    if mode != MODE_SERVER {
        return Err(ProbeFailure::ProtocolMismatch(format!("unexpected NTP mode {mode}, expected {MODE_SERVER}")));
    }
    if version != VERSION3 {
        return Err(ProbeFailure::ProtocolMismatch(format!("unexpected NTP version {version}, expected {VERSION3}")));
    }
    if leap == LEAP_NOTSYNC {
        return Err(ProbeFailure::ProtocolMismatch("server reports LEAP_NOTSYNC (clock not synchronized)".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn synced_server_reply_accepted() {
        let mut reply = [0u8; PACKET_LEN];
        reply[0] = 0x1c; // leap=0, version=3, mode=4
        let mut t = mock_transport(&reply);
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn short_reply_rejected() {
        let mut t = mock_transport(&[0u8; PACKET_LEN - 1]);
        let err = check(&mut t).await.unwrap_err();
        assert!(err.to_string().contains("47 bytes"));
    }

    #[tokio::test]
    async fn unsynchronized_leap_rejected() {
        let mut reply = [0u8; PACKET_LEN];
        reply[0] = (LEAP_NOTSYNC << 6) | (VERSION3 << 3) | MODE_SERVER;
        let mut t = mock_transport(&reply);
        assert!(check(&mut t).await.is_err());
    }
}
