//! ICMP echo ("ping") liveness probe. Bypasses the `Transport` abstraction
//! entirely: ICMP has no listening port to connect a stream or datagram
//! socket to, so this probe opens its own raw socket via `socket2` and
//! drives it through `tokio::io::unix::AsyncFd` for async readiness.
//!
//! Opening a raw socket requires `CAP_NET_RAW` (or root); when denied,
//! this surfaces as [`ProbeFailure::Permission`] rather than a generic
//! transport error, so the validator can tell "host unreachable" apart
//! from "monit itself is not allowed to ping".

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::ProbeFailure;

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const IDENTIFIER: u16 = 0xC0DE;

fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds an echo request. For IPv6, the checksum covers a pseudo-header
/// (source/dest address, next-header, length) that isn't available here;
/// the kernel fills it in for `IPPROTO_ICMPV6` raw sockets, so the
/// checksum field is left zero in that case (RFC 3542 §3.1).
fn build_echo_request(sequence: u16, is_v6: bool) -> [u8; 8] {
    let mut packet = [0u8; 8];
    packet[0] = if is_v6 { ICMPV6_ECHO_REQUEST } else { ICMPV4_ECHO_REQUEST };
    packet[1] = 0; // code
    packet[4..6].copy_from_slice(&IDENTIFIER.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    if !is_v6 {
        let csum = checksum(&packet);
        packet[2..4].copy_from_slice(&csum.to_be_bytes());
    }
    packet
}

pub async fn check(addr: IpAddr, timeout: Duration) -> Result<(), ProbeFailure> {
    let is_v6 = addr.is_ipv6();
    let domain = if is_v6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if is_v6 { SockProtocol::ICMPV6 } else { SockProtocol::ICMPV4 };
    let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            ProbeFailure::Permission(format!("opening a raw ICMP socket requires CAP_NET_RAW: {e}"))
        } else {
            ProbeFailure::Transport(format!("failed to open ICMP socket: {e}"))
        }
    })?;
    socket.set_nonblocking(true).map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    let target = SocketAddr::new(addr, 0).into();
    let request = build_echo_request(1, is_v6);
    socket
        .send_to(&request, &target)
        .map_err(|e| ProbeFailure::Transport(format!("failed to send echo request: {e}")))?;

    let async_fd = AsyncFd::new(socket).map_err(|e| ProbeFailure::Transport(e.to_string()))?;
    let mut buf = [0u8; 128];

    let result = tokio::time::timeout(timeout, async {
        loop {
            let mut guard = async_fd.readable().await.map_err(|e| ProbeFailure::Transport(e.to_string()))?;
            match guard.try_io(|inner| inner.get_ref().recv(unsafe { buf_as_maybe_uninit(&mut buf) })) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => return Err(ProbeFailure::Transport(e.to_string())),
                Err(_would_block) => continue,
            }
        }
    })
    .await;

    let n = match result {
        Ok(inner) => inner?,
        Err(_) => return Err(ProbeFailure::ProtocolMismatch(format!("no echo reply within {timeout:?}"))),
    };

    // IPv4 raw sockets deliver the full IP header in front of the ICMP
    // payload (header length is the low nibble of the first byte times 4);
    // IPv6 raw sockets deliver the ICMPv6 payload alone.
    if n < 1 {
        return Err(ProbeFailure::ProtocolMismatch("empty ICMP reply".into()));
    }
    let ihl = if is_v6 { 0 } else { (buf[0] & 0x0F) as usize * 4 };
    if n < ihl + 8 {
        return Err(ProbeFailure::ProtocolMismatch("reply too short to contain an ICMP header".into()));
    }
    let icmp = &buf[ihl..n];
    let expected_reply = if is_v6 { ICMPV6_ECHO_REPLY } else { ICMPV4_ECHO_REPLY };
    if icmp[0] != expected_reply {
        return Err(ProbeFailure::ProtocolMismatch(format!("unexpected ICMP type {}, expected echo reply", icmp[0])));
    }
    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    if identifier != IDENTIFIER {
        return Err(ProbeFailure::ProtocolMismatch("echo reply identifier does not match our request".into()));
    }
    Ok(())
}

/// Safe wrapper around the unsafe reinterpret `recv` needs; the buffer is
/// plain-old-data (`u8`) so treating it as `MaybeUninit<u8>` for the
/// duration of the call is sound.
unsafe fn buf_as_maybe_uninit(buf: &mut [u8]) -> &mut [std::mem::MaybeUninit<u8>] {
    std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_echo_request_is_internally_consistent() {
        let packet = build_echo_request(7, false);
        // A correctly checksummed ICMP packet sums to 0 (mod 0xFFFF) when
        // the checksum field itself is included in the computation.
        let sum = checksum(&packet);
        assert_eq!(sum, 0);
    }

    #[test]
    fn echo_request_carries_our_identifier_and_sequence() {
        let packet = build_echo_request(42, false);
        assert_eq!(packet[0], ICMPV4_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), IDENTIFIER);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 42);
    }

    #[test]
    fn v6_echo_request_leaves_the_checksum_for_the_kernel() {
        let packet = build_echo_request(1, true);
        assert_eq!(packet[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
    }
}
