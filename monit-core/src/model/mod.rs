//! # Service model (component D)
//!
//! The in-memory graph of services, groups, commands, rules and events
//! that the validator (component E) and control engine (component F)
//! both operate on. Populated by the config loader (`monitd::config`,
//! the stand-in for the out-of-scope grammar parser) and held for the
//! process lifetime.

mod graph;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use graph::{ControlLock, VisitSet};

/// Unique identity for a [`Service`].
pub type ServiceName = String;

/// The kind of resource a [`Service`] watches, carrying its variant-
/// specific attributes instead of a class hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceKind {
    Filesystem { mount_point: String },
    Directory { path: String },
    File { path: String },
    Process { pidfile: String },
    RemoteHost { host: String, port: u16, protocol: String },
    System,
    Fifo { path: String },
    Program,
    Network { interface: String },
}

impl ServiceKind {
    /// The filesystem path a `Checksum`/`Permission`/`Content` rule reads
    /// for this service kind, if it has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ServiceKind::Filesystem { mount_point } => Some(mount_point),
            ServiceKind::Directory { path } => Some(path),
            ServiceKind::File { path } => Some(path),
            ServiceKind::Fifo { path } => Some(path),
            ServiceKind::Process { .. }
            | ServiceKind::RemoteHost { .. }
            | ServiceKind::System
            | ServiceKind::Program
            | ServiceKind::Network { .. } => None,
        }
    }
}

/// One of the five control actions, plus the passive rule actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Monitor,
    Unmonitor,
    Ignore,
    Alert,
    Exec,
}

/// `monitor_state`: controls whether the validator evaluates a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Not,
    Init,
    Yes,
}

/// An ephemeral, per-invocation command descriptor. The child process it
/// spawns is created, polled and reaped entirely within one
/// `control::exec` call; nothing here is held across calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub argv: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Command {
    /// Builds a command, enforcing the `argv[0]` non-empty invariant.
    pub fn new(argv: Vec<String>, uid: Option<u32>, gid: Option<u32>, timeout: Duration) -> Self {
        assert!(
            argv.first().is_some_and(|s| !s.is_empty()),
            "Command::argv[0] must be non-empty"
        );
        Self { argv, uid, gid, timeout }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Last-observed facts about a service, refreshed by the validator each
/// cycle. For `Process` services, `pid` is authoritative only after a
/// successful post-action observation window (`control::exec::wait_start`
/// / `wait_stop`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFacts {
    pub pid: Option<u32>,
    pub memory_kb: Option<u64>,
    pub cpu_percent: Option<f32>,
    pub children: u32,
    pub uptime: Option<Duration>,
}

/// Comparison operator used by a [`Rule`] threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Ne,
    Changed,
}

/// What kind of measurement a [`Rule`] evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "measure", rename_all = "snake_case")]
pub enum RuleKind {
    Checksum { algorithm: String, expected: String },
    Resource { metric: ResourceMetric },
    Connection { protocol: String },
    Uptime,
    Permission { expected_mode: u32 },
    Content { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMetric {
    CpuPercent,
    MemoryKb,
    Children,
}

/// A threshold rule attached to a service: compares a measured value
/// against a threshold with `operator`, and triggers `action` once the
/// failure has been observed for `cycles_required` consecutive cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub operator: Operator,
    pub threshold: f64,
    pub cycles_required: u32,
    pub action: Action,
    #[serde(default)]
    consecutive_failures: u32,
    /// The raw measured value (a checksum hex digest, a permission mode,
    /// a resource reading, ...) observed last cycle, kept so
    /// `Operator::Changed` has something to compare against instead of
    /// being permanently inert.
    #[serde(default)]
    last_fingerprint: Option<String>,
}

impl Rule {
    pub fn new(kind: RuleKind, operator: Operator, threshold: f64, cycles_required: u32, action: Action) -> Self {
        Self {
            kind,
            operator,
            threshold,
            cycles_required: cycles_required.max(1),
            action,
            consecutive_failures: 0,
            last_fingerprint: None,
        }
    }

    /// Applies one cycle's measured value. Returns `true` exactly once the
    /// trigger count is reached (the cycle that should raise an `Event`).
    /// Resets the counter on a passing comparison.
    pub fn observe(&mut self, measured: f64, changed: bool) -> bool {
        let failed = match self.operator {
            Operator::Gt => measured > self.threshold,
            Operator::Lt => measured < self.threshold,
            Operator::Eq => (measured - self.threshold).abs() < f64::EPSILON,
            Operator::Ne => (measured - self.threshold).abs() >= f64::EPSILON,
            Operator::Changed => changed,
        };
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.consecutive_failures >= self.cycles_required
    }

    /// Current consecutive-failure count, for persisting across restarts.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Restores a consecutive-failure count loaded from a state snapshot.
    pub fn restore_consecutive_failures(&mut self, count: u32) {
        self.consecutive_failures = count;
    }

    /// Records this cycle's raw measured value and reports whether it
    /// differs from the one recorded last cycle. The first call after a
    /// rule is created (or reloaded with no prior fingerprint) never
    /// reports a change — there is nothing yet to have changed from.
    pub fn note_fingerprint(&mut self, fingerprint: impl Into<String>) -> bool {
        let fingerprint = fingerprint.into();
        let changed = self.last_fingerprint.as_deref().is_some_and(|prev| prev != fingerprint);
        self.last_fingerprint = Some(fingerprint);
        changed
    }

    /// The fingerprint recorded last cycle, for persisting across restarts.
    pub fn last_fingerprint(&self) -> Option<&str> {
        self.last_fingerprint.as_deref()
    }

    /// Restores a fingerprint loaded from a state snapshot.
    pub fn restore_fingerprint(&mut self, fingerprint: Option<String>) {
        self.last_fingerprint = fingerprint;
    }
}

/// A declared service: identity, kind, lifecycle commands, dependency
/// edges, monitoring state, last-known facts and attached rules.
///
/// `visited`/`depend_visited` from the original design are deliberately
/// absent as fields here (REDESIGN FLAG): they are built fresh per
/// top-level `control()` call as a [`VisitSet`] in `graph.rs`, so two
/// services can never leak traversal state between unrelated walks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: ServiceName,
    pub kind: ServiceKind,
    pub start: Option<Command>,
    pub stop: Option<Command>,
    pub restart: Option<Command>,
    pub dependants: Vec<ServiceName>,
    pub monitor_state: MonitorState,
    #[serde(default)]
    pub inf: ServiceFacts,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Service {
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            start: None,
            stop: None,
            restart: None,
            dependants: Vec::new(),
            monitor_state: MonitorState::Not,
            inf: ServiceFacts::default(),
            rules: Vec::new(),
        }
    }

    pub fn is_process(&self) -> bool {
        matches!(self.kind, ServiceKind::Process { .. })
    }
}

/// A named set of service names for bulk operations (`<action> <group>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    pub members: Vec<ServiceName>,
}

/// Disposition raised when a rule crosses its trigger or a lifecycle step
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Succeeded,
    Failed,
    Changed,
    Init,
}

/// What a rule or control step triggers on (matches `MONIT_EVENT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Exec,
    Checksum,
    Resource,
    Connection,
    Uptime,
    Permission,
    Content,
    Exist,
}

/// One emitted event: service, kind, resulting state, the action that was
/// taken (if any), a human message, and the wall-clock time it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub service: ServiceName,
    pub kind: EventKind,
    pub state: EventState,
    pub action: Option<Action>,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    pub fn new(service: impl Into<String>, kind: EventKind, state: EventState, action: Option<Action>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            state,
            action,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// The whole, mutable service graph. Mutated only by the config
/// loader/reload path and by control-engine action handlers holding the
/// [`ControlLock`] (spec §5's "global control lock").
#[derive(Debug, Default)]
pub struct ServiceGraph {
    pub services: HashMap<ServiceName, Service>,
    pub groups: HashMap<String, ServiceGroup>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Service) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.get_mut(name)
    }

    /// Validates that `dependants` edges only reference known services and
    /// that the graph is acyclic. The out-of-scope grammar parser would
    /// normally guarantee this at parse time; the loader in `monitd`
    /// calls this explicitly since it stands in for that collaborator.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        for svc in self.services.values() {
            for dep in &svc.dependants {
                if !self.services.contains_key(dep) {
                    return Err(crate::error::ConfigError::UnknownDependant(dep.clone()));
                }
            }
        }
        let mut state: HashMap<&str, u8> = HashMap::new(); // 0=unseen,1=visiting,2=done
        for name in self.services.keys() {
            self.check_cycle(name, &mut state)?;
        }
        Ok(())
    }

    fn check_cycle<'a>(&'a self, name: &'a str, state: &mut HashMap<&'a str, u8>) -> Result<(), crate::error::ConfigError> {
        match state.get(name) {
            Some(2) => return Ok(()),
            Some(1) => return Err(crate::error::ConfigError::Cycle(name.to_string())),
            _ => {}
        }
        state.insert(name, 1);
        if let Some(svc) = self.services.get(name) {
            for dep in &svc.dependants {
                self.check_cycle(dep, state)?;
            }
        }
        state.insert(name, 2);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_requires_nonempty_argv0() {
        let cmd = Command::new(vec!["/bin/true".into()], None, None, Duration::from_secs(5));
        assert_eq!(cmd.program(), "/bin/true");
    }

    #[test]
    #[should_panic]
    fn command_rejects_empty_argv0() {
        Command::new(vec![String::new()], None, None, Duration::from_secs(5));
    }

    #[test]
    fn rule_triggers_after_n_consecutive_failures() {
        let mut rule = Rule::new(RuleKind::Uptime, Operator::Gt, 10.0, 3, Action::Alert);
        assert!(!rule.observe(20.0, false));
        assert!(!rule.observe(20.0, false));
        assert!(rule.observe(20.0, false));
        // A passing cycle resets the counter.
        assert!(!rule.observe(1.0, false));
        assert!(!rule.observe(20.0, false));
    }

    #[test]
    fn note_fingerprint_reports_changed_only_once_a_prior_value_differs() {
        let mut rule = Rule::new(RuleKind::Uptime, Operator::Changed, 0.0, 1, Action::Alert);
        // Nothing recorded yet: first observation is a baseline, not a change.
        assert!(!rule.note_fingerprint("abc"));
        assert!(!rule.note_fingerprint("abc"));
        assert!(rule.note_fingerprint("def"));
        assert_eq!(rule.last_fingerprint(), Some("def"));
        // Settling on the new value stops reporting change.
        assert!(!rule.note_fingerprint("def"));
    }

    #[test]
    fn service_kind_path_covers_only_filesystem_backed_variants() {
        assert_eq!(ServiceKind::File { path: "/etc/passwd".into() }.path(), Some("/etc/passwd"));
        assert_eq!(ServiceKind::Directory { path: "/var/log".into() }.path(), Some("/var/log"));
        assert_eq!(ServiceKind::Filesystem { mount_point: "/mnt".into() }.path(), Some("/mnt"));
        assert_eq!(ServiceKind::Fifo { path: "/tmp/p".into() }.path(), Some("/tmp/p"));
        assert_eq!(ServiceKind::Program.path(), None);
        assert_eq!(ServiceKind::RemoteHost { host: "h".into(), port: 1, protocol: "tcp".into() }.path(), None);
    }

    #[test]
    fn graph_detects_cycles() {
        let mut graph = ServiceGraph::new();
        let mut a = Service::new("a", ServiceKind::Program);
        a.dependants.push("b".into());
        let mut b = Service::new("b", ServiceKind::Program);
        b.dependants.push("a".into());
        graph.insert(a);
        graph.insert(b);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn graph_rejects_unknown_dependant() {
        let mut graph = ServiceGraph::new();
        let mut a = Service::new("a", ServiceKind::Program);
        a.dependants.push("ghost".into());
        graph.insert(a);
        assert!(matches!(
            graph.validate(),
            Err(crate::error::ConfigError::UnknownDependant(_))
        ));
    }
}
