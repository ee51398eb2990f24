//! Error taxonomy for the control engine, probe library and transport
//! substrate. Kinds mirror the dispositions in §7 of the design: transport
//! and protocol failures are data the validator reports on a service, not
//! exceptions that unwind the daemon.

use thiserror::Error;

/// Failures from `Transport` operations (component A).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection refused")]
    Refused,
    #[error("failed to resolve host: {0}")]
    Resolve(String),
    #[error("TLS error: {0}")]
    Tls(#[from] crate::error::TlsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation not supported over UDP")]
    UnsupportedForUdp,
    #[error("transport was reset or is no longer connected")]
    Closed,
}

/// Failures from the TLS substrate (component B).
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificate or key material: {0}")]
    Load(String),
    #[error("certificate/key do not match")]
    KeyMismatch,
    #[error("requested protocol version is not supported: {0}")]
    UnsupportedProtocol(String),
    #[error("peer certificate verification failed: {0}")]
    Verify(String),
    #[error("peer certificate fingerprint does not match the configured value")]
    FingerprintMismatch,
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A probe's (component C) outcome when liveness cannot be confirmed.
/// Probes never panic or propagate process-ending errors; a failure here
/// is reported as a failed rule evaluation for that cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("{0}")]
    ProtocolMismatch(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("permission denied: {0}")]
    Permission(String),
}

impl From<TransportError> for ProbeFailure {
    fn from(e: TransportError) -> Self {
        ProbeFailure::Transport(e.to_string())
    }
}

/// Failures raised by the control engine (component F) while orchestrating
/// a dependency walk or executing a command.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("service '{0}' is not known to the control engine")]
    UnknownService(String),
    #[error("program '{0}' failed: {1}")]
    ExecFailed(String, String),
    #[error("program '{0}' timed out")]
    ExecTimedOut(String),
    #[error("no {0} command is configured for this service")]
    NoCommand(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal, startup-only errors (config parsing, state-file corruption beyond
/// recovery). These are the only kind allowed to reach `main` and set the
/// process exit code.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Parse(String),
    #[error("dependency graph contains a cycle at '{0}'")]
    Cycle(String),
    #[error("service '{0}' is referenced as a dependant but is not defined")]
    UnknownDependant(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
