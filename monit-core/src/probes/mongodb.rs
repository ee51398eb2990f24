//! MongoDB liveness probe: sends a legacy-wire-protocol `OP_QUERY` asking
//! `admin.$cmd` for `{ isMaster: 1 }` and requires a framed `OP_REPLY`
//! with at least one returned document. The reply's contents are not
//! parsed past the header; getting a well-formed reply at all is proof
//! the server is alive and speaking the wire protocol.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const OP_QUERY: i32 = 2004;
const OP_REPLY: i32 = 1;
const REQUEST_ID: i32 = 1;

/// `{ isMaster: 1 }` as BSON: int32 length, one int32 element, terminator.
fn is_master_document() -> Vec<u8> {
    let mut doc = Vec::new();
    doc.push(0x10); // element type: int32
    doc.extend_from_slice(b"isMaster\0");
    doc.extend_from_slice(&1i32.to_le_bytes());
    doc.push(0x00); // document terminator
    let len = (doc.len() + 4) as i32;
    let mut full = len.to_le_bytes().to_vec();
    full.extend(doc);
    full
}

fn build_query() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // flags
    body.extend_from_slice(b"admin.$cmd\0"); // fullCollectionName
    body.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    body.extend_from_slice(&(-1i32).to_le_bytes()); // numberToReturn
    body.extend(is_master_document());

    let message_length = (16 + body.len()) as i32;
    let mut msg = Vec::with_capacity(message_length as usize);
    msg.extend_from_slice(&message_length.to_le_bytes());
    msg.extend_from_slice(&REQUEST_ID.to_le_bytes());
    msg.extend_from_slice(&0i32.to_le_bytes()); // responseTo
    msg.extend_from_slice(&OP_QUERY.to_le_bytes());
    msg.extend(body);
    msg
}

pub async fn check(transport: &mut Transport) -> ProbeResult {
    transport.write_bytes(&build_query()).await?;

    let mut header = [0u8; 16];
    let n = transport.read_bytes(&mut header, header.len()).await?;
    if n != header.len() {
        return Err(ProbeFailure::ProtocolMismatch(format!("short reply header ({n} bytes)")));
    }
    let message_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
    let response_to = i32::from_le_bytes(header[8..12].try_into().unwrap());
    let op_code = i32::from_le_bytes(header[12..16].try_into().unwrap());

    if op_code != OP_REPLY {
        return Err(ProbeFailure::ProtocolMismatch(format!("unexpected opCode {op_code}, expected OP_REPLY")));
    }
    if response_to != REQUEST_ID {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "responseTo {response_to} does not match request id {REQUEST_ID}"
        )));
    }
    if message_length < 16 {
        return Err(ProbeFailure::ProtocolMismatch(format!("implausible message length {message_length}")));
    }

    let mut reply_body = [0u8; 20]; // responseFlags + cursorID + startingFrom + numberReturned
    let n = transport.read_bytes(&mut reply_body, reply_body.len()).await?;
    if n != reply_body.len() {
        return Err(ProbeFailure::ProtocolMismatch(format!("short OP_REPLY body ({n} bytes)")));
    }
    let number_returned = i32::from_le_bytes(reply_body[16..20].try_into().unwrap());
    if number_returned < 1 {
        return Err(ProbeFailure::ProtocolMismatch("isMaster reply returned no documents".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    fn op_reply(response_to: i32, op_code: i32, number_returned: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes()); // responseFlags
        body.extend_from_slice(&0i64.to_le_bytes()); // cursorID
        body.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
        body.extend_from_slice(&number_returned.to_le_bytes());

        let message_length = (16 + body.len()) as i32;
        let mut msg = Vec::new();
        msg.extend_from_slice(&message_length.to_le_bytes());
        msg.extend_from_slice(&1i32.to_le_bytes()); // requestID (unused by the probe)
        msg.extend_from_slice(&response_to.to_le_bytes());
        msg.extend_from_slice(&op_code.to_le_bytes());
        msg.extend(body);
        msg
    }

    #[tokio::test]
    async fn well_formed_reply_accepted() {
        let mut t = mock_transport(&op_reply(REQUEST_ID, OP_REPLY, 1));
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_opcode_rejected() {
        let mut t = mock_transport(&op_reply(REQUEST_ID, 999, 1));
        assert!(check(&mut t).await.is_err());
    }

    #[tokio::test]
    async fn empty_reply_rejected() {
        let mut t = mock_transport(&op_reply(REQUEST_ID, OP_REPLY, 0));
        assert!(check(&mut t).await.is_err());
    }
}
