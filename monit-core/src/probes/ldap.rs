//! LDAPv3 liveness probe: anonymous `BindRequest` / `BindResponse`
//! followed by an `UnbindRequest`. Encodes just enough BER to exercise the
//! handshake — this is not a general ASN.1 codec, only the fixed shapes
//! spec §4.C calls for.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

/// `LDAPMessage { messageID=1, BindRequest { version=3, name="", simple="" } }`.
const ANONYMOUS_BIND: &[u8] = &[0x30, 0x0C, 0x02, 0x01, 0x01, 0x60, 0x07, 0x02, 0x01, 0x03, 0x04, 0x00, 0x80, 0x00];
/// `LDAPMessage { messageID=2, UnbindRequest }`.
const UNBIND: &[u8] = &[0x30, 0x05, 0x02, 0x01, 0x02, 0x42, 0x00];

pub async fn check(transport: &mut Transport) -> ProbeResult {
    transport.write_bytes(ANONYMOUS_BIND).await?;
    let msg = read_ber_message(transport).await?;
    let result_code = parse_bind_response_result_code(&msg)
        .ok_or_else(|| ProbeFailure::ProtocolMismatch("malformed BindResponse".into()))?;
    if result_code != 0 {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "bind failed with LDAP result code {result_code}"
        )));
    }
    // Unbind has no response; the connection owner tears the transport
    // down right after.
    transport.write_bytes(UNBIND).await?;
    Ok(())
}

/// Reads one short-form-length BER TLV (`SEQUENCE` envelope) from the
/// wire: tag byte, one length byte (0-127), then that many content bytes.
async fn read_ber_message(transport: &mut Transport) -> Result<Vec<u8>, ProbeFailure> {
    let tag = transport.read_byte().await?;
    let len = transport.read_byte().await?;
    if len & 0x80 != 0 {
        return Err(ProbeFailure::ProtocolMismatch("long-form BER length not supported by this probe".into()));
    }
    let mut content = vec![0u8; len as usize];
    let mut filled = 0usize;
    while filled < content.len() {
        let n = transport.read_bytes(&mut content[filled..], content.len() - filled).await?;
        if n == 0 {
            return Err(ProbeFailure::ProtocolMismatch("connection closed mid-message".into()));
        }
        filled += n;
    }
    let mut out = vec![tag, len];
    out.extend(content);
    Ok(out)
}

/// Pulls the `resultCode` ENUMERATED value out of a `BindResponse`
/// embedded in `msg` (an `LDAPMessage` SEQUENCE). Assumes short-form
/// lengths throughout, matching what real directory servers emit for this
/// tiny a response.
fn parse_bind_response_result_code(msg: &[u8]) -> Option<i64> {
    // msg: 30 LL 02 01 <id> 61 LL2 0A 01 <resultCode> ...
    if msg.len() < 9 || msg[0] != 0x30 {
        return None;
    }
    let id_len = msg[3] as usize; // length of the messageID INTEGER content
    let mut pos = 2 + 2 + id_len; // tag+len + (02 LL) + content
    if msg.get(pos)? != &0x61 {
        return None; // not an APPLICATION 1 BindResponse
    }
    pos += 2; // skip protocolOp tag + length
    if msg.get(pos)? != &0x0A {
        return None; // not an ENUMERATED
    }
    pos += 1;
    let code_len = *msg.get(pos)? as usize;
    pos += 1;
    let bytes = msg.get(pos..pos + code_len)?;
    let mut value: i64 = 0;
    for b in bytes {
        value = (value << 8) | (*b as i64);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    fn bind_response(result_code: u8) -> Vec<u8> {
        // LDAPMessage { messageID=1, BindResponse { resultCode, matchedDN="", errorMessage="" } }
        vec![
            0x30, 0x0C, // SEQUENCE, len 12
            0x02, 0x01, 0x01, // messageID = 1
            0x61, 0x07, // BindResponse, len 7
            0x0A, 0x01, result_code, // resultCode ENUMERATED
            0x04, 0x00, // matchedDN = ""
            0x04, 0x00, // errorMessage = ""
        ]
    }

    #[tokio::test]
    async fn success_result_code_accepted() {
        let mut t = mock_transport(&bind_response(0));
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_result_code_rejected() {
        let mut t = mock_transport(&bind_response(49)); // invalidCredentials
        assert!(check(&mut t).await.is_err());
    }
}
