//! SIP liveness probe: sends an `OPTIONS` request and requires a
//! `SIP/2.0` status line in response (any status code counts as "alive" —
//! a SIP element can legitimately answer `OPTIONS` with 2xx through 6xx).

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

pub async fn check(transport: &mut Transport, host: &str) -> ProbeResult {
    let request = format!(
        "OPTIONS sip:{host} SIP/2.0\r\n\
         Via: SIP/2.0/TCP {host};branch=z9hG4bKmonit\r\n\
         Max-Forwards: 70\r\n\
         To: <sip:{host}>\r\n\
         From: <sip:monit@{host}>;tag=monit\r\n\
         Call-ID: monit-probe@{host}\r\n\
         CSeq: 1 OPTIONS\r\n\
         Content-Length: 0\r\n\r\n"
    );
    transport.print(&request).await?;
    let line = transport.read_line(512).await?;
    if line.starts_with("SIP/2.0") {
        Ok(())
    } else {
        Err(ProbeFailure::ProtocolMismatch(format!(
            "expected a SIP/2.0 status line, got '{}'",
            line.trim_end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn status_line_accepted() {
        let mut t = mock_transport(b"SIP/2.0 200 OK\r\n");
        assert!(check(&mut t, "example.com").await.is_ok());
    }

    #[tokio::test]
    async fn garbage_response_rejected() {
        let mut t = mock_transport(b"HTTP/1.1 200 OK\r\n");
        assert!(check(&mut t, "example.com").await.is_err());
    }
}
