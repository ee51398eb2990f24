//! DNS liveness probe: a minimal iterative query/response round trip for
//! an `A` record against `.` (the root), over whatever transport
//! (TCP or UDP) the caller connected. Only checks that a syntactically
//! valid response with a matching transaction ID and the `QR` (response)
//! bit set comes back — not that the answer resolves to anything.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const QUERY_ID: u16 = 0x1337;

fn build_query() -> Vec<u8> {
    let mut msg = Vec::with_capacity(17);
    msg.extend_from_slice(&QUERY_ID.to_be_bytes());
    msg.extend_from_slice(&[0x01, 0x00]); // flags: recursion desired
    msg.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    msg.extend_from_slice(&[0u16.to_be_bytes(), 0u16.to_be_bytes(), 0u16.to_be_bytes()].concat());
    msg.push(0x00); // root name
    msg.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    msg.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    msg
}

pub async fn check(transport: &mut Transport) -> ProbeResult {
    let query = build_query();
    transport.write_bytes(&query).await?;

    let mut header = [0u8; 12];
    let n = transport.read_bytes(&mut header, header.len()).await?;
    if n != header.len() {
        return Err(ProbeFailure::ProtocolMismatch(format!("short DNS header ({n} bytes)")));
    }

    let id = u16::from_be_bytes([header[0], header[1]]);
    if id != QUERY_ID {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "response transaction id {id:#06x} does not match query {QUERY_ID:#06x}"
        )));
    }

    let flags = u16::from_be_bytes([header[2], header[3]]);
    let qr = (flags >> 15) & 0x1;
    if qr != 1 {
        return Err(ProbeFailure::ProtocolMismatch("QR bit not set; not a response".into()));
    }
    let rcode = flags & 0x0F;
    if rcode != 0 {
        return Err(ProbeFailure::ProtocolMismatch(format!("server returned RCODE {rcode}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    fn response_header(id: u16, flags: u16) -> Vec<u8> {
        let mut h = Vec::with_capacity(12);
        h.extend_from_slice(&id.to_be_bytes());
        h.extend_from_slice(&flags.to_be_bytes());
        h.extend_from_slice(&[0u8; 8]);
        h
    }

    #[tokio::test]
    async fn well_formed_response_accepted() {
        let mut t = mock_transport(&response_header(QUERY_ID, 0x8180));
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn mismatched_transaction_id_rejected() {
        let mut t = mock_transport(&response_header(0x0001, 0x8180));
        assert!(check(&mut t).await.is_err());
    }

    #[tokio::test]
    async fn server_failure_rcode_rejected() {
        let mut t = mock_transport(&response_header(QUERY_ID, 0x8182)); // RCODE=2, SERVFAIL
        assert!(check(&mut t).await.is_err());
    }
}
