//! # Configuration loader
//!
//! Stands in for the out-of-scope grammar-driven parser (spec §1): a
//! small, explicit TOML description of the daemon's settings, the control
//! channel's credentials, and the service graph, deserialized straight
//! into `monit_core::model` types via `serde` + the `toml` crate — the
//! same pairing the teacher's `lib_common::configs` module uses for its
//! own runtime configuration.
//!
//! This loader is deliberately thin: it trusts the shapes `monit_core`
//! already derives `Deserialize` for, and adds only what a standalone
//! daemon config needs on top (`[daemon]`, `[control]`) plus the acyclic
//! dependency-graph check spec §3 requires at parse time.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use monit_core::error::ConfigError;
use monit_core::model::{Service, ServiceGraph, ServiceGroup};

fn default_host() -> String {
    hostname()
}

fn default_polltime() -> u64 {
    30
}

fn default_username() -> String {
    "monit".to_string()
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// `[daemon]`: process-wide settings that aren't a property of any one
/// service.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_polltime")]
    pub polltime: u64,
    pub pidfile: Option<PathBuf>,
    pub statefile: Option<PathBuf>,
    pub logfile: Option<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            polltime: default_polltime(),
            pidfile: None,
            statefile: None,
            logfile: None,
        }
    }
}

/// `[control.tls]`: optional TLS for the control channel listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlTls {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client_ca: Option<PathBuf>,
    #[serde(default)]
    pub allow_self_signed: bool,
}

/// `[control]`: the control channel's bind address and shared credential.
/// Exactly one of `bind`/`unix_socket` is expected; `bind` wins if both are
/// set (mirroring the original tool's "last directive wins" config style).
#[derive(Debug, Clone, Deserialize)]
pub struct ControlSettings {
    pub bind: Option<String>,
    pub unix_socket: Option<PathBuf>,
    #[serde(default = "default_username")]
    pub username: String,
    pub password: String,
    pub tls: Option<ControlTls>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    daemon: DaemonSettings,
    control: Option<ControlSettings>,
    #[serde(default, rename = "service")]
    services: Vec<Service>,
    #[serde(default, rename = "group")]
    groups: Vec<ServiceGroup>,
}

/// Everything a loaded config produces: daemon settings, optional control
/// channel settings, and a validated service graph.
pub struct LoadedConfig {
    pub daemon: DaemonSettings,
    pub control: Option<ControlSettings>,
    pub graph: ServiceGraph,
}

/// Reads and parses `path`, builds the service graph, and validates it
/// (acyclic `dependants`, no dangling references) exactly as spec §3
/// requires of the external parser this loader substitutes for.
pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let raw: RawConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;

    let mut graph = ServiceGraph::new();
    for service in raw.services {
        graph.insert(service);
    }
    for group in raw.groups {
        for member in &group.members {
            if !graph.services.contains_key(member) {
                return Err(ConfigError::UnknownDependant(member.clone()));
            }
        }
        graph.groups.insert(group.name.clone(), group);
    }
    graph.validate()?;

    Ok(LoadedConfig {
        daemon: raw.daemon,
        control: raw.control,
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[daemon]
host = "test-host"
polltime = 10

[control]
bind = "127.0.0.1:2812"
password = "secret"

[[service]]
name = "web"
kind = { kind = "process", pidfile = "/run/web.pid" }
dependants = ["db"]
monitor_state = "yes"

[service.start]
argv = ["/usr/bin/web"]
timeout = 30

[[service]]
name = "db"
kind = { kind = "process", pidfile = "/run/db.pid" }
dependants = []
monitor_state = "yes"

[[group]]
name = "backend"
members = ["web", "db"]
"#;

    #[test]
    fn parses_daemon_control_and_services() {
        let dir = std::env::temp_dir().join(format!("monitd-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("monitd.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let loaded = load(&path).expect("sample config should parse");
        assert_eq!(loaded.daemon.host, "test-host");
        assert_eq!(loaded.daemon.polltime, 10);
        assert_eq!(loaded.control.unwrap().bind.as_deref(), Some("127.0.0.1:2812"));
        assert!(loaded.graph.get("web").is_some());
        assert!(loaded.graph.get("db").is_some());
        assert_eq!(loaded.graph.get("web").unwrap().dependants, vec!["db".to_string()]);
        assert!(loaded.graph.groups.contains_key("backend"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_a_group_referencing_an_unknown_service() {
        let dir = std::env::temp_dir().join(format!("monitd-config-test-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("monitd.toml");
        std::fs::write(
            &path,
            r#"
[[service]]
name = "web"
kind = { kind = "program" }
dependants = []
monitor_state = "not"

[[group]]
name = "backend"
members = ["ghost"]
"#,
        )
        .unwrap();

        assert!(load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
