//! gpsd liveness probe: sends the legacy `G\r\n` poll command and accepts
//! any of the three watch-greeting shapes older gpsd versions answer
//! with (`GPSD,G=GPS`, `GPSD,G=RTCM104`, `GPSD,G=RTCM104v2`).

use super::common::ProbeResult;
use crate::error::ProbeFailure;
use crate::transport::Transport;

const MAX_LINE: usize = 256;
const ACCEPTED_PREFIXES: [&str; 3] = ["GPSD,G=GPS", "GPSD,G=RTCM104v2", "GPSD,G=RTCM104"];

pub async fn check(transport: &mut Transport) -> ProbeResult {
    transport.print("G\r\n").await?;
    let line = transport.read_line(MAX_LINE).await?;

    for prefix in ACCEPTED_PREFIXES {
        if expect_prefix_matches(&line, prefix) {
            return Ok(());
        }
    }
    Err(ProbeFailure::ProtocolMismatch(format!(
        "unexpected gpsd reply '{}', expected one of {ACCEPTED_PREFIXES:?}",
        line.trim_end()
    )))
}

fn expect_prefix_matches(line: &str, prefix: &str) -> bool {
    line.to_ascii_uppercase().starts_with(&prefix.to_ascii_uppercase())
}
