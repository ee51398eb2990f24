//! RADIUS liveness probe (spec §4.C, bit-exact). UDP only.
//!
//! Builds a 38-byte `Status-Server` request (code `0x0c`), signs it with
//! HMAC-MD5 over a `Message-Authenticator` attribute, and validates the
//! reply's framing and response authenticator.
//!
//! REDESIGN FLAG: the original implementation draws the 16-byte Request
//! Authenticator from the process PRNG directly, which makes the
//! authenticator-signing test non-deterministic. Here the caller supplies
//! it (`request_authenticator`), so tests can fix a known vector and
//! production code can pass freshly generated bytes from `rand`.
//!
//! §9 Open Question: the original reports an authenticator mismatch via
//! `set_error` but still returns success. That historical behavior is
//! preserved exactly here (see `check`'s final comparison) pending the
//! confirmation the spec says it's still waiting on.

use hmac::{Hmac, Mac};
use md5::Md5;

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

type HmacMd5 = Hmac<Md5>;

const CODE_STATUS_SERVER: u8 = 0x0c;
const ATTR_MESSAGE_AUTHENTICATOR: u8 = 0x50;
const PACKET_LEN: usize = 38;

/// Builds and signs a Status-Server request, returning the wire bytes.
fn build_request(id: u8, request_authenticator: &[u8; 16], secret: &[u8]) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CODE_STATUS_SERVER;
    packet[1] = id;
    packet[2..4].copy_from_slice(&(PACKET_LEN as u16).to_be_bytes());
    packet[4..20].copy_from_slice(request_authenticator);
    packet[20] = ATTR_MESSAGE_AUTHENTICATOR;
    packet[21] = 0x12; // 18 = 2-byte header + 16-byte MAC
                        // packet[22..38] stays zero while the MAC is computed.

    let mut mac = HmacMd5::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&packet);
    let digest = mac.finalize().into_bytes();
    packet[22..38].copy_from_slice(&digest);
    packet
}

pub async fn check(transport: &mut Transport, secret: &[u8], request_authenticator: [u8; 16]) -> ProbeResult {
    let request_id = 0x00;
    let request = build_request(request_id, &request_authenticator, secret);
    transport.write_bytes(&request).await?;

    let mut buf = [0u8; 4096];
    let n = transport.read_bytes(&mut buf, buf.len()).await?;
    if n < 20 {
        return Err(ProbeFailure::ProtocolMismatch(format!("reply too short ({n} bytes)")));
    }
    let reply = &buf[..n];

    let code = reply[0];
    if code != 2 && code != 5 {
        return Err(ProbeFailure::ProtocolMismatch(format!("invalid reply code {code}")));
    }
    if reply[1] != request_id {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "reply id {} does not match request id {request_id}",
            reply[1]
        )));
    }
    let declared_len = u16::from_be_bytes([reply[2], reply[3]]) as usize;
    if declared_len != n {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "declared length {declared_len} does not match received length {n}"
        )));
    }

    walk_attributes(&reply[20..declared_len])?;

    let saved_response_authenticator = reply[4..20].to_vec();
    let mut check_buf = reply.to_vec();
    check_buf[4..20].copy_from_slice(&request_authenticator);
    check_buf.extend_from_slice(secret);
    use md5::Digest;
    let computed = Md5::digest(&check_buf);

    if computed.as_slice() != saved_response_authenticator.as_slice() {
        // Historical quirk, preserved intentionally: a mismatch here is
        // reported for visibility but does not fail the probe.
        transport.set_error("RADIUS: response authenticator mismatch");
    }
    Ok(())
}

/// Walks the attribute TLVs validating that each one's declared length is
/// internally consistent and does not run past the packet boundary.
fn walk_attributes(mut attrs: &[u8]) -> Result<(), ProbeFailure> {
    while !attrs.is_empty() {
        if attrs.len() < 2 {
            return Err(ProbeFailure::ProtocolMismatch("truncated attribute header".into()));
        }
        let len = attrs[1] as usize;
        if len < 2 || len > attrs.len() {
            return Err(ProbeFailure::ProtocolMismatch(format!("attribute with invalid length {len}")));
        }
        attrs = &attrs[len..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    const SECRET: &[u8] = b"testing123";

    fn zero_authenticator() -> [u8; 16] {
        [0u8; 16]
    }

    fn accept_reply(request_authenticator: &[u8; 16], secret: &[u8], code: u8) -> Vec<u8> {
        let mut reply = vec![0u8; 20];
        reply[0] = code;
        reply[1] = 0x00;
        reply[2..4].copy_from_slice(&20u16.to_be_bytes());
        // Build the correct response authenticator: MD5(code|id|len|request_authenticator|secret).
        let mut buf = reply.clone();
        buf[4..20].copy_from_slice(request_authenticator);
        buf.extend_from_slice(secret);
        use md5::Digest;
        let digest = Md5::digest(&buf);
        reply[4..20].copy_from_slice(&digest);
        reply
    }

    #[tokio::test]
    async fn valid_accept_reply_is_ok() {
        let auth = zero_authenticator();
        let reply = accept_reply(&auth, SECRET, 2);
        let mut t = mock_transport(&reply);
        assert!(check(&mut t, SECRET, auth).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_code_is_rejected() {
        let auth = zero_authenticator();
        let reply = accept_reply(&auth, SECRET, 3);
        let mut t = mock_transport(&reply);
        let err = check(&mut t, SECRET, auth).await.unwrap_err();
        assert!(err.to_string().contains("invalid reply code"));
    }

    #[tokio::test]
    async fn authenticator_mismatch_is_soft_failure() {
        // §9 Open Question: a mismatched response authenticator is still
        // reported as `Ok`, with the mismatch stashed via `set_error`.
        let auth = zero_authenticator();
        let mut reply = accept_reply(&auth, SECRET, 2);
        reply[4] ^= 0xFF; // corrupt the response authenticator
        let mut t = mock_transport(&reply);
        assert!(check(&mut t, SECRET, auth).await.is_ok());
    }

    #[test]
    fn request_signing_is_deterministic_for_a_fixed_authenticator() {
        let auth = zero_authenticator();
        let packet_a = build_request(0x00, &auth, SECRET);
        let packet_b = build_request(0x00, &auth, SECRET);
        assert_eq!(packet_a, packet_b);
        assert_eq!(packet_a.len(), PACKET_LEN);
        assert_eq!(packet_a[0], CODE_STATUS_SERVER);
    }
}
