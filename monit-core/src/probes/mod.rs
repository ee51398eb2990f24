//! # Probe library (component C)
//!
//! Each probe is a pure function `check(transport) -> Result<(), ProbeFailure>`.
//! A probe never owns or closes its `Transport`; it is handed a connected
//! one, drives it through a protocol-specific handshake, and reports
//! liveness. Failures are returned as data (spec §7's propagation policy),
//! never panics.

mod common;

pub mod dns;
pub mod ftp;
pub mod generic;
pub mod gpsd;
pub mod http;
pub mod icmp;
pub mod imap;
pub mod ldap;
pub mod memcache;
pub mod mongodb;
pub mod mysql;
pub mod ntp;
pub mod pop;
pub mod postgres;
pub mod radius;
pub mod redis;
pub mod rsync;
pub mod sieve;
pub mod sip;
pub mod smtp;
pub mod ssh;
pub mod websocket;

pub use common::ProbeResult;

/// Identifies which protocol-specific probe to run for a `RemoteHost` /
/// `Network` service, matching the `protocol` attribute on
/// [`crate::model::ServiceKind::RemoteHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    ImapS,
    Pop,
    PopS,
    Smtp,
    SmtpS,
    Http,
    Https,
    Ldap,
    Mysql,
    Postgres,
    Ntp,
    Radius,
    Ssh,
    Dns,
    Rsync,
    Memcache,
    Redis,
    MongoDb,
    Sieve,
    Sip,
    Ftp,
    WebSocket,
    Icmp,
    Gpsd,
    Generic,
}

impl std::str::FromStr for Protocol {
    type Err = crate::error::ProbeFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "imap" => Protocol::Imap,
            "imaps" => Protocol::ImapS,
            "pop" | "pop3" => Protocol::Pop,
            "pops" | "pop3s" => Protocol::PopS,
            "smtp" => Protocol::Smtp,
            "smtps" => Protocol::SmtpS,
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "ldap" => Protocol::Ldap,
            "mysql" => Protocol::Mysql,
            "postgres" | "postgresql" | "pgsql" => Protocol::Postgres,
            "ntp" => Protocol::Ntp,
            "radius" => Protocol::Radius,
            "ssh" => Protocol::Ssh,
            "dns" => Protocol::Dns,
            "rsync" => Protocol::Rsync,
            "memcache" | "memcached" => Protocol::Memcache,
            "redis" => Protocol::Redis,
            "mongodb" | "mongo" => Protocol::MongoDb,
            "sieve" | "managesieve" => Protocol::Sieve,
            "sip" => Protocol::Sip,
            "ftp" => Protocol::Ftp,
            "websocket" | "ws" => Protocol::WebSocket,
            "icmp" | "ping" => Protocol::Icmp,
            "gpsd" => Protocol::Gpsd,
            "generic" | "" => Protocol::Generic,
            other => return Err(crate::error::ProbeFailure::ProtocolMismatch(format!("unknown protocol '{other}'"))),
        })
    }
}
