//! rsync daemon liveness probe (spec §4.C): exchanges the `@RSYNCD:`
//! greeting, lists modules, then exits cleanly.
//!
//! Sequence: read `@RSYNCD: <version>\n`, echo the same version back,
//! send `#list\n`, drain module lines until `@RSYNCD: EXIT\n`.

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const GREETING_PREFIX: &str = "@RSYNCD:";
const EXIT_LINE: &str = "@RSYNCD: EXIT";
const MAX_LINE: usize = 512;
const MAX_MODULE_LINES: usize = 256;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    let greeting = transport.read_line(MAX_LINE).await?;
    if !greeting.starts_with(GREETING_PREFIX) {
        return Err(ProbeFailure::ProtocolMismatch(format!(
            "expected rsync greeting starting with '{GREETING_PREFIX}', got '{}'",
            greeting.trim_end()
        )));
    }
    transport.print(greeting.trim_end()).await?;
    transport.print("\n").await?;

    transport.print("#list\n").await?;

    for _ in 0..MAX_MODULE_LINES {
        let line = transport.read_line(MAX_LINE).await?;
        if line.trim_end().starts_with(EXIT_LINE) {
            return Ok(());
        }
    }
    Err(ProbeFailure::ProtocolMismatch("module list never reached @RSYNCD: EXIT".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn greeting_list_and_exit_accepted() {
        let mut t = mock_transport(b"@RSYNCD: 31.0\nbackup\thome backups\nsrc\tsource tree\n@RSYNCD: EXIT\n");
        assert!(check(&mut t).await.is_ok());
    }

    #[tokio::test]
    async fn bad_greeting_rejected() {
        let mut t = mock_transport(b"HELLO\n");
        assert!(check(&mut t).await.is_err());
    }
}
