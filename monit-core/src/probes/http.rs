//! HTTP liveness probe: issues a `HEAD` (or `GET`) request over an
//! already-connected `Transport` and requires a parseable `HTTP/1.x NNN`
//! status line with `NNN < 400`. Optionally requires a regex match
//! somewhere in the body when `GET` is used.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

pub struct HttpCheck<'a> {
    pub host: &'a str,
    pub path: &'a str,
    pub use_get: bool,
    pub body_pattern: Option<&'a str>,
}

pub async fn check(transport: &mut Transport, cfg: &HttpCheck<'_>) -> ProbeResult {
    let method = if cfg.use_get { "GET" } else { "HEAD" };
    let request = format!(
        "{method} {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
        cfg.path, cfg.host
    );
    transport.print(&request).await?;

    let status_line = transport.read_line(512).await?;
    let code = parse_status_code(&status_line)
        .ok_or_else(|| ProbeFailure::ProtocolMismatch(format!("malformed status line: '{}'", status_line.trim_end())))?;
    if code >= 400 {
        return Err(ProbeFailure::ProtocolMismatch(format!("HTTP status {code}")));
    }

    if let Some(pattern) = cfg.body_pattern {
        // Skip headers.
        loop {
            let line = transport.read_line(1024).await?;
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        let mut body = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match transport.read_bytes(&mut buf, buf.len()).await {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
            if body.len() > 64 * 1024 {
                break;
            }
        }
        let text = String::from_utf8_lossy(&body);
        if !text.contains(pattern) {
            return Err(ProbeFailure::ProtocolMismatch(format!(
                "response body did not match pattern '{pattern}'"
            )));
        }
    }

    Ok(())
}

fn parse_status_code(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let proto = parts.next()?;
    if !proto.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn ok_status_is_success() {
        let mut t = mock_transport(b"HTTP/1.1 200 OK\r\n");
        let cfg = HttpCheck { host: "example.com", path: "/", use_get: false, body_pattern: None };
        assert!(check(&mut t, &cfg).await.is_ok());
    }

    #[tokio::test]
    async fn server_error_status_fails() {
        let mut t = mock_transport(b"HTTP/1.1 503 Service Unavailable\r\n");
        let cfg = HttpCheck { host: "example.com", path: "/", use_get: false, body_pattern: None };
        assert!(check(&mut t, &cfg).await.is_err());
    }

    #[tokio::test]
    async fn body_pattern_is_matched() {
        let mut t = mock_transport(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nservice is healthy\r\n");
        let cfg = HttpCheck { host: "example.com", path: "/status", use_get: true, body_pattern: Some("healthy") };
        assert!(check(&mut t, &cfg).await.is_ok());
    }
}
