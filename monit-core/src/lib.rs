//! # monit-core
//!
//! The control engine, probe library and secure transport substrate shared
//! by the `monitd` daemon and the `monit-tools` utility binaries.
//!
//! This crate never touches a terminal or a config file directly — it is
//! the "brain" consumed by `monitd`, the same way `lib_common` is the
//! shared engine consumed by the `servers` binaries in the sibling parts
//! of this workspace.

#![warn(rust_2018_idioms, unused_qualifications)]

pub mod channel;
pub mod control;
pub mod error;
pub mod model;
pub mod probes;
pub mod state;
pub mod tls;
pub mod transport;
pub mod validator;

pub use error::{ControlError, ProbeFailure, TlsError, TransportError};
pub use transport::Transport;
