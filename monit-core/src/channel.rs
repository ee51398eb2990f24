//! # Control channel wire format (component G)
//!
//! The control channel itself (the TCP/UNIX/TLS listener, its credential
//! store and its wiring to [`crate::control::Engine`]) is daemon plumbing
//! and lives in `monitd::channel`. What belongs here, next to the rest of
//! the protocol-shaped code in this crate, is the wire format both ends
//! agree on: an HTTP/1.0-shaped request/response pair carrying one
//! action+service pair, exactly as spec §4.G describes it.
//!
//! Kept framing-agnostic on purpose — these functions take and return
//! already-assembled strings; reading the request line/headers/body off a
//! [`crate::transport::Transport`] is the daemon's job, not this module's.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::control::ControlAction;

/// Bound on the response body a client will read before giving up on
/// finding the failure message, matching spec's "body (bounded to 1024
/// bytes)".
pub const MAX_RESPONSE_BODY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("unauthorized")]
    Unauthorized,
}

/// One parsed `POST /<service> HTTP/1.0` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub service: String,
    pub action: ControlAction,
}

fn action_verb(action: ControlAction) -> &'static str {
    match action {
        ControlAction::Start => "start",
        ControlAction::Stop => "stop",
        ControlAction::Restart => "restart",
        ControlAction::Monitor => "monitor",
        ControlAction::Unmonitor => "unmonitor",
    }
}

fn action_from_verb(verb: &str) -> Result<ControlAction, ChannelError> {
    match verb {
        "start" => Ok(ControlAction::Start),
        "stop" => Ok(ControlAction::Stop),
        "restart" => Ok(ControlAction::Restart),
        "monitor" => Ok(ControlAction::Monitor),
        "unmonitor" => Ok(ControlAction::Unmonitor),
        other => Err(ChannelError::UnknownAction(other.to_string())),
    }
}

/// Builds the client-side request: request line, headers (including the
/// `Authorization: Basic` line derived from `username:password`), and the
/// `action=<verb>` body.
pub fn format_request(service: &str, action: ControlAction, username: &str, password: &str) -> String {
    let body = format!("action={}", action_verb(action));
    let credential = BASE64.encode(format!("{username}:{password}"));
    format!(
        "POST /{service} HTTP/1.0\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {len}\r\n\
         Authorization: Basic {credential}\r\n\
         \r\n\
         {body}",
        len = body.len(),
    )
}

/// Parses a full request (request line + headers + body, `\r\n`-joined)
/// and checks the `Authorization: Basic` line against `expected_credential`
/// (already `username:password`, unencoded — this function base64-encodes
/// it itself so callers never have to).
pub fn parse_request(raw: &str, expected_username: &str, expected_password: &str) -> Result<ControlRequest, ChannelError> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next().ok_or_else(|| ChannelError::BadRequest("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| ChannelError::BadRequest("missing method".into()))?;
    if method != "POST" {
        return Err(ChannelError::BadRequest(format!("unsupported method '{method}'")));
    }
    let path = parts.next().ok_or_else(|| ChannelError::BadRequest("missing path".into()))?;
    let service = path.trim_start_matches('/').to_string();
    if service.is_empty() {
        return Err(ChannelError::BadRequest("missing service name in path".into()));
    }

    let expected = BASE64.encode(format!("{expected_username}:{expected_password}"));
    let mut authorized = false;
    let mut body = String::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            body.push_str(line);
            continue;
        }
        if line.is_empty() {
            in_body = true;
            continue;
        }
        if let Some(value) = line.strip_prefix("Authorization: Basic ") {
            authorized = value.trim() == expected;
        }
    }
    if !authorized {
        return Err(ChannelError::Unauthorized);
    }

    let verb = body
        .strip_prefix("action=")
        .ok_or_else(|| ChannelError::BadRequest("missing action= body".into()))?;
    let action = action_from_verb(verb.trim())?;
    Ok(ControlRequest { service, action })
}

/// Builds the server-side response: an HTTP/1.0-shape status line plus a
/// minimal HTML body carrying `message` between the `</h2>` and `<p>`
/// markers the client-side parser looks for.
pub fn format_response(success: bool, message: &str) -> String {
    let status_line = if success { "HTTP/1.0 200 OK" } else { "HTTP/1.0 400 Bad Request" };
    let body = format!("<html><body><h2>monitd</h2>{message}<p></p></body></html>");
    format!(
        "{status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

/// Parses a response: status line below 300 is success; 300 and above is
/// failure, with the message extracted from between `</h2>` and `<p>` in
/// the (bounded) body.
pub fn parse_response(raw: &str) -> Result<(), String> {
    let bounded = &raw[..raw.len().min(MAX_RESPONSE_BODY + 256)];
    let mut lines = bounded.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(599);

    if status < 300 {
        return Ok(());
    }

    let body: String = lines.collect::<Vec<_>>().join("\n");
    let bounded_body = &body[..body.len().min(MAX_RESPONSE_BODY)];
    let message = bounded_body
        .find("</h2>")
        .and_then(|start| {
            let after = &bounded_body[start + "</h2>".len()..];
            after.find("<p>").map(|end| after[..end].trim().to_string())
        })
        .unwrap_or_else(|| format!("request failed with status {status}"));
    Err(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_start_request() {
        let raw = format_request("web", ControlAction::Start, "admin", "secret");
        let parsed = parse_request(&raw, "admin", "secret").unwrap();
        assert_eq!(parsed.service, "web");
        assert_eq!(parsed.action, ControlAction::Start);
    }

    #[test]
    fn wrong_credential_is_unauthorized() {
        let raw = format_request("web", ControlAction::Stop, "admin", "secret");
        let err = parse_request(&raw, "admin", "wrong").unwrap_err();
        assert_eq!(err, ChannelError::Unauthorized);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = "POST /web HTTP/1.0\r\nAuthorization: Basic YWRtaW46c2VjcmV0\r\n\r\naction=launch";
        let err = parse_request(raw, "admin", "secret").unwrap_err();
        assert!(matches!(err, ChannelError::UnknownAction(_)));
    }

    #[test]
    fn success_response_parses_as_ok() {
        let raw = format_response(true, "service 'web' started");
        assert!(parse_response(&raw).is_ok());
    }

    #[test]
    fn failure_response_extracts_message_between_markers() {
        let raw = format_response(false, "service 'web' is unknown");
        let err = parse_response(&raw).unwrap_err();
        assert_eq!(err, "service 'web' is unknown");
    }
}
