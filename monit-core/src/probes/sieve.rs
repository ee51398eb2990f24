//! ManageSieve liveness probe. The greeting is a sequence of capability
//! lines (`"NAME" "VALUE"` or bare tokens) terminated by a final `OK`
//! line; once seen, `LOGOUT\r\n` must be acknowledged with another `OK`
//! line.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

async fn read_until_ok(transport: &mut Transport) -> ProbeResult {
    for _ in 0..64 {
        let line = transport.read_line(1024).await?;
        if line.is_empty() {
            return Err(ProbeFailure::ProtocolMismatch("connection closed before OK".into()));
        }
        if line.trim_start().to_ascii_uppercase().starts_with("OK") {
            return Ok(());
        }
    }
    Err(ProbeFailure::ProtocolMismatch("too many capability lines without OK".into()))
}

pub async fn check(transport: &mut Transport) -> ProbeResult {
    read_until_ok(transport).await?;
    transport.print("LOGOUT\r\n").await?;
    read_until_ok(transport).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn capability_banner_then_logout() {
        let mut t = mock_transport(
            b"\"IMPLEMENTATION\" \"Example Sieve\"\r\n\"SIEVE\" \"fileinto\"\r\nOK\r\nOK \"Logout complete\"\r\n",
        );
        assert!(check(&mut t).await.is_ok());
    }
}
