//! # Control engine (component F)
//!
//! Dependency-ordered start/stop/restart/monitor/unmonitor orchestration.
//! `Engine::control` is the only public entry point; everything else is an
//! internal walk helper mirroring the `_doStart`/`_doStop`/`_doDepend`/
//! `_doMonitor`/`_doUnmonitor` family from spec §4.F, re-expressed without
//! the two sentinel fields the original kept on every `Service` (REDESIGN
//! FLAG, see `model::graph::VisitSet`).
//!
//! `dependants` on a [`Service`] lists the services it depends ON
//! (prerequisites). The reverse edge — "who depends on me" — is not
//! stored; it is recomputed by scanning the graph each time `_doDepend`
//! needs it, which is cheap at the service counts this daemon manages and
//! keeps the graph's only source of truth in one place.

mod exec;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::error::ControlError;
use crate::model::{Action, ControlLock, Event, EventKind, EventState, MonitorState, ServiceGraph, ServiceName, VisitSet};

pub use exec::ExecOutcome;

/// The five actions `control()` accepts. Distinct from [`crate::model::Action`],
/// which also carries the passive rule actions (ignore/alert/exec) that are
/// never the top-level argument to `control()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Monitor,
    Unmonitor,
}

/// The dependency-aware dispatcher. Holds the shared graph behind an async
/// mutex and a dedicated [`ControlLock`] — spec §5's "global control lock"
/// — held for the duration of one top-level `control()` call so two
/// concurrent calls on overlapping subgraphs serialize rather than race.
pub struct Engine {
    graph: Arc<AsyncMutex<ServiceGraph>>,
    lock: Arc<ControlLock>,
    events: mpsc::UnboundedSender<Event>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    host: String,
}

impl Engine {
    pub fn new(
        graph: Arc<AsyncMutex<ServiceGraph>>,
        events: mpsc::UnboundedSender<Event>,
        stopped: Arc<std::sync::atomic::AtomicBool>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            lock: Arc::new(ControlLock::new()),
            events,
            stopped,
            host: host.into(),
        }
    }

    /// Runs one top-level dependency-ordered action against `name`, holding
    /// the global control lock for the whole walk.
    pub async fn control(&self, name: &str, action: ControlAction) -> Result<(), ControlError> {
        let _guard = self.lock.acquire().await;
        if !self.graph.lock().await.services.contains_key(name) {
            return Err(ControlError::UnknownService(name.to_string()));
        }
        let mut visits = VisitSet::new();

        match action {
            ControlAction::Start => {
                self.do_depend(&mut visits, name, ControlAction::Stop, false).await;
                self.do_start(&mut visits, name).await;
                self.do_depend(&mut visits, name, ControlAction::Start, false).await;
            }
            ControlAction::Stop => {
                self.do_depend(&mut visits, name, ControlAction::Stop, true).await;
                self.do_stop(&mut visits, name, true).await;
            }
            ControlAction::Restart => {
                self.do_depend(&mut visits, name, ControlAction::Stop, false).await;
                let has_restart = self.graph.lock().await.get(name).and_then(|s| s.restart.clone()).is_some();
                if has_restart {
                    self.do_restart(&mut visits, name).await;
                    self.do_depend(&mut visits, name, ControlAction::Start, false).await;
                } else {
                    let stopped_ok = self.do_stop(&mut visits, name, false).await;
                    if stopped_ok {
                        self.do_start(&mut visits, name).await;
                        self.do_depend(&mut visits, name, ControlAction::Start, false).await;
                    } else {
                        // Stop failed: re-arm monitoring so a later validator
                        // cycle retries, rather than leaving the service
                        // silently unmonitored.
                        if let Some(svc) = self.graph.lock().await.get_mut(name) {
                            svc.monitor_state = MonitorState::Yes;
                        }
                    }
                }
            }
            ControlAction::Monitor => {
                self.do_monitor(&mut visits, name).await;
            }
            ControlAction::Unmonitor => {
                self.do_depend(&mut visits, name, ControlAction::Unmonitor, false).await;
                self.do_unmonitor(&mut visits, name).await;
            }
        }
        Ok(())
    }

    /// Names of services `X` such that `name` appears in `X.dependants`
    /// (i.e. `X` depends on `name` and so cannot remain up once `name`
    /// goes down). Order follows declaration order in the graph's
    /// `HashMap` iteration for determinism within a process run.
    async fn reverse_direct_dependents(&self, name: &str) -> Vec<ServiceName> {
        let graph = self.graph.lock().await;
        let mut out: Vec<ServiceName> = graph
            .services
            .values()
            .filter(|s| s.dependants.iter().any(|d| d == name))
            .map(|s| s.name.clone())
            .collect();
        out.sort();
        out
    }

    /// `_doDepend`: walks the reverse-dependency graph rooted at `name`.
    ///
    /// For `Stop`/`Unmonitor`, each reverse-dependent's own reverse-dependents
    /// are processed first (post-order) so the furthest-out dependent goes
    /// down before anything it relies on — this is the order the testable
    /// scenario in spec §8 requires (`control(A, Stop)` stops `C` before `B`
    /// before `A` when `C` depends on `B` depends on `A`).
    ///
    /// For `Start`/`Monitor`, each reverse-dependent is processed before its
    /// own reverse-dependents (pre-order), so a dependent comes back up only
    /// after what it needs is already up.
    fn do_depend<'a>(
        &'a self,
        visits: &'a mut VisitSet,
        name: &'a str,
        action: ControlAction,
        flag: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let reverse = self.reverse_direct_dependents(name).await;
            for x in reverse {
                if visits.is_depend_visited(&x) {
                    continue;
                }
                visits.mark_depend_visited(&x);
                match action {
                    ControlAction::Stop => {
                        self.do_depend(visits, &x, action, flag).await;
                        self.do_stop(visits, &x, flag).await;
                    }
                    ControlAction::Unmonitor => {
                        self.do_depend(visits, &x, action, flag).await;
                        self.do_unmonitor(visits, &x).await;
                    }
                    ControlAction::Start => {
                        self.do_start(visits, &x).await;
                        self.do_depend(visits, &x, action, flag).await;
                    }
                    ControlAction::Monitor => {
                        self.do_monitor(visits, &x).await;
                        self.do_depend(visits, &x, action, flag).await;
                    }
                    ControlAction::Restart => unreachable!("do_depend is never called with Restart"),
                }
            }
        })
    }

    /// `_doStart`: post-fix — recursively starts every prerequisite of
    /// `name` before running `name`'s own start command. Re-arms
    /// monitoring for `name` regardless of the command's outcome.
    fn do_start<'a>(
        &'a self,
        visits: &'a mut VisitSet,
        name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !visits.mark_visited(name) {
                return;
            }
            let deps = match self.graph.lock().await.get(name) {
                Some(s) => s.dependants.clone(),
                None => return,
            };
            for d in deps {
                self.do_start(visits, &d).await;
            }
            let outcome = self.exec_lifecycle(name, "start").await;
            self.post_exec_event(name, &outcome, "started").await;
            if let Some(svc) = self.graph.lock().await.get_mut(name) {
                svc.monitor_state = MonitorState::Yes;
            }
        })
    }

    /// `_doRestart`: runs the configured restart command directly (no
    /// prerequisite recursion — a restart command is expected to handle
    /// its own service in place).
    async fn do_restart(&self, _visits: &mut VisitSet, name: &str) {
        let outcome = self.exec_lifecycle(name, "restart").await;
        self.post_exec_event(name, &outcome, "restarted").await;
        if let Some(svc) = self.graph.lock().await.get_mut(name) {
            svc.monitor_state = MonitorState::Yes;
        }
    }

    /// `_doStop`: runs the stop command once per walk (idempotent via
    /// `visits`). `disable_monitor = true` sets `monitor_state = Not`
    /// (used by the top-level `Stop` action and by `_doDepend(.., Stop,
    /// true)`); `false` only clears transient facts (used by `Restart`'s
    /// own-stop step, which intends to start again right after). Returns
    /// whether the stop succeeded, which `Restart` uses to decide whether
    /// to proceed to `_doStart`.
    async fn do_stop(&self, visits: &mut VisitSet, name: &str, disable_monitor: bool) -> bool {
        if !visits.mark_visited(name) {
            return true;
        }
        let outcome = self.exec_lifecycle(name, "stop").await;
        self.post_exec_event(name, &outcome, "stopped").await;
        let ok = matches!(outcome, ExecOutcome::Succeeded(_));
        if let Some(svc) = self.graph.lock().await.get_mut(name) {
            if disable_monitor {
                svc.monitor_state = MonitorState::Not;
            } else {
                svc.inf = Default::default();
            }
        }
        ok
    }

    /// `_doMonitor`: post-fix — enables monitoring for every prerequisite
    /// of `name` before `name` itself.
    fn do_monitor<'a>(
        &'a self,
        visits: &'a mut VisitSet,
        name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !visits.mark_visited(name) {
                return;
            }
            let deps = match self.graph.lock().await.get(name) {
                Some(s) => s.dependants.clone(),
                None => return,
            };
            for d in deps {
                self.do_monitor(visits, &d).await;
            }
            if let Some(svc) = self.graph.lock().await.get_mut(name) {
                svc.monitor_state = MonitorState::Yes;
            }
        })
    }

    /// `_doUnmonitor`: disables monitoring for `name` alone (its reverse
    /// dependents were already handled by `_doDepend` before this runs).
    async fn do_unmonitor(&self, _visits: &mut VisitSet, name: &str) {
        if let Some(svc) = self.graph.lock().await.get_mut(name) {
            svc.monitor_state = MonitorState::Not;
        }
    }

    async fn exec_lifecycle(&self, name: &str, which: &'static str) -> ExecOutcome {
        let (cmd, facts, is_process) = {
            let graph = self.graph.lock().await;
            let Some(svc) = graph.get(name) else {
                return ExecOutcome::Failed("0".into(), format!("service '{name}' vanished"));
            };
            let cmd = match which {
                "start" => svc.start.clone(),
                "stop" => svc.stop.clone(),
                "restart" => svc.restart.clone(),
                _ => None,
            };
            (cmd, svc.inf.clone(), svc.is_process())
        };
        let Some(cmd) = cmd else {
            return ExecOutcome::Failed("0".into(), format!("no {which} command is configured"));
        };
        exec::run(&cmd, name, which, &self.host, &facts, is_process, Arc::clone(&self.stopped)).await
    }

    async fn post_exec_event(&self, name: &str, outcome: &ExecOutcome, verb: &str) {
        let event = match outcome {
            ExecOutcome::Succeeded(_) => Event::new(
                name,
                EventKind::Exec,
                EventState::Succeeded,
                None,
                format!("service '{name}' {verb}"),
            ),
            ExecOutcome::Failed(status, message) => Event::new(
                name,
                EventKind::Exec,
                EventState::Failed,
                Some(Action::Exec),
                format!("service '{name}' failed to {verb}: exit {status}: {message}"),
            ),
            ExecOutcome::TimedOut(message) => Event::new(
                name,
                EventKind::Exec,
                EventState::Failed,
                Some(Action::Exec),
                format!("service '{name}' timed out attempting to {verb}: {message}"),
            ),
        };
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Service, ServiceKind};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn chain_graph() -> ServiceGraph {
        // A -> (no deps); B depends on A; C depends on B.
        let mut graph = ServiceGraph::new();
        let a = Service::new("a", ServiceKind::Program);
        let mut b = Service::new("b", ServiceKind::Program);
        b.dependants.push("a".into());
        let mut c = Service::new("c", ServiceKind::Program);
        c.dependants.push("b".into());
        graph.insert(a);
        graph.insert(b);
        graph.insert(c);
        graph
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let graph = Arc::new(AsyncMutex::new(ServiceGraph::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = Engine::new(graph, tx, Arc::new(AtomicBool::new(false)), "host");
        let err = engine.control("ghost", ControlAction::Start).await.unwrap_err();
        assert!(matches!(err, ControlError::UnknownService(_)));
    }

    #[tokio::test]
    async fn monitor_then_unmonitor_is_idempotent() {
        let graph = Arc::new(AsyncMutex::new(chain_graph()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = Engine::new(graph.clone(), tx, Arc::new(AtomicBool::new(false)), "host");

        engine.control("c", ControlAction::Monitor).await.unwrap();
        {
            let g = graph.lock().await;
            assert_eq!(g.get("a").unwrap().monitor_state, MonitorState::Yes);
            assert_eq!(g.get("b").unwrap().monitor_state, MonitorState::Yes);
            assert_eq!(g.get("c").unwrap().monitor_state, MonitorState::Yes);
        }
        // Calling monitor again is a no-op (still Yes everywhere).
        engine.control("c", ControlAction::Monitor).await.unwrap();
        assert_eq!(graph.lock().await.get("c").unwrap().monitor_state, MonitorState::Yes);

        engine.control("c", ControlAction::Unmonitor).await.unwrap();
        assert_eq!(graph.lock().await.get("c").unwrap().monitor_state, MonitorState::Not);
        // Idempotent: unmonitoring again is still Not.
        engine.control("c", ControlAction::Unmonitor).await.unwrap();
        assert_eq!(graph.lock().await.get("c").unwrap().monitor_state, MonitorState::Not);
    }

    #[tokio::test]
    async fn reverse_direct_dependents_finds_the_chain() {
        let graph = chain_graph();
        let graph = Arc::new(AsyncMutex::new(graph));
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = Engine::new(graph, tx, Arc::new(AtomicBool::new(false)), "host");
        // Things that depend on "a" directly: just "b".
        assert_eq!(engine.reverse_direct_dependents("a").await, vec!["b".to_string()]);
        assert_eq!(engine.reverse_direct_dependents("b").await, vec!["c".to_string()]);
        assert!(engine.reverse_direct_dependents("c").await.is_empty());
    }

    #[tokio::test]
    async fn exec_timeout_reports_failure_without_hanging() {
        let mut graph = ServiceGraph::new();
        let mut svc = Service::new("slow", ServiceKind::Program);
        svc.start = Some(crate::model::Command::new(
            vec!["sleep".into(), "10".into()],
            None,
            None,
            Duration::from_millis(200),
        ));
        graph.insert(svc);
        let graph = Arc::new(AsyncMutex::new(graph));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = Engine::new(graph, tx, Arc::new(AtomicBool::new(false)), "host");

        let start = std::time::Instant::now();
        engine.control("slow", ControlAction::Start).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        let event = rx.try_recv().expect("an Exec event was posted");
        assert_eq!(event.state, EventState::Failed);
        assert!(event.message.contains("timed out"));
    }
}
