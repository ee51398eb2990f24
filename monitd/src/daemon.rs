//! # Daemon run loop
//!
//! Wires the service graph, control engine, validator and control channel
//! together and drives the validator's polling cadence, matching the
//! teacher's `servers` binaries' pattern of a `tokio::select!` over a
//! ticking interval and OS signals rather than a single blocking loop.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use monit_core::control::Engine;
use monit_core::model::ServiceGraph;
use monit_core::state::StateStore;
use monit_core::tls::{ClientCaSource, TlsServerContext};
use monit_core::validator::{SysinfoFacts, Validator};

use crate::channel::ControlChannelListener;
use crate::config::{ControlSettings, ControlTls, DaemonSettings};

/// Everything `main` resolves from the config file and CLI overrides
/// before handing off to [`run`].
pub struct DaemonContext {
    pub daemon: DaemonSettings,
    pub control: Option<ControlSettings>,
    pub graph: ServiceGraph,
    pub statefile: PathBuf,
    pub polltime: Duration,
    pub config_path: PathBuf,
}

/// Runs until asked to stop (`SIGTERM`/`SIGINT`). Returns once every
/// background task has wound down. `quit` (spec §6) is not a control-channel
/// verb — like the original tool, a running daemon is asked to quit by
/// signaling its pidfile's PID directly (see `monitd::main`).
pub async fn run(ctx: DaemonContext) -> anyhow::Result<()> {
    let state_store = Arc::new(StateStore::new(ctx.statefile.clone()));
    let mut graph = ctx.graph;
    state_store.load_into(&mut graph)?;
    let graph = Arc::new(AsyncMutex::new(graph));

    let stopped = Arc::new(AtomicBool::new(false));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(Engine::new(graph.clone(), event_tx.clone(), stopped.clone(), ctx.daemon.host.clone()));

    let events_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::info!(
                service = %event.service,
                kind = ?event.kind,
                state = ?event.state,
                message = %event.message,
                "event"
            );
        }
    });

    let mut channel_task = spawn_control_channel(ctx.control.as_ref(), graph.clone(), engine.clone())?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut ticker = tokio::time::interval(ctx.polltime);
    let mut validator = Validator::new(graph.clone(), engine.clone(), event_tx.clone(), SysinfoFacts::new());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                validator.run_cycle().await;
                if let Err(e) = state_store.save(&*graph.lock().await) {
                    tracing::warn!(error = %e, "failed to persist state");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received interrupt, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sighup.recv() => {
                // spec §5: the validator drains the current cycle (already
                // true here — we only reach this branch between ticks, never
                // inside one), stops the control channel, saves state,
                // re-parses config, then restarts the control channel.
                tracing::info!("received SIGHUP, reloading configuration");
                if let Err(e) = reload(&ctx.config_path, &state_store, &graph, &mut channel_task, &engine).await {
                    tracing::error!(error = %e, "config reload failed; continuing with the previous configuration");
                }
            }
            _ = sigusr1.recv() => {
                // spec §5's `dowakeup`: run an off-cycle validation pass now
                // rather than waiting for the next tick, then resume the
                // regular cadence from this point.
                tracing::info!("received SIGUSR1, running an immediate validation cycle");
                validator.run_cycle().await;
                if let Err(e) = state_store.save(&*graph.lock().await) {
                    tracing::warn!(error = %e, "failed to persist state");
                }
                ticker.reset();
            }
        }
    }

    if let Err(e) = state_store.save(&*graph.lock().await) {
        tracing::warn!(error = %e, "failed to persist state on shutdown");
    }

    if let Some(task) = channel_task {
        task.abort();
    }
    drop(event_tx);
    events_task.await.ok();
    Ok(())
}

/// Binds and spawns the control channel listener, if `[control]` is
/// configured. Split out of `run` so `reload` can tear down and rebuild it
/// against a freshly parsed configuration.
fn spawn_control_channel(
    control: Option<&ControlSettings>,
    graph: Arc<AsyncMutex<ServiceGraph>>,
    engine: Arc<Engine>,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(control) = control else {
        tracing::warn!("no [control] section configured; the control channel is disabled");
        return Ok(None);
    };
    let tls = load_control_tls(control.tls.as_ref())?;
    let listener = ControlChannelListener::new(control.clone(), tls, graph, engine);
    Ok(Some(tokio::spawn(async move {
        if let Err(e) = listener.serve().await {
            tracing::error!(error = %e, "control channel stopped");
        }
    })))
}

/// `SIGHUP` handling (spec §5): stop the control channel, persist the
/// current graph's runtime state, re-parse `config_path`, replace the
/// graph's contents in place (restoring monitoring flags and rule counters
/// from the just-saved snapshot so a reload never forgets what it was
/// already tracking), then restart the control channel against the new
/// settings.
async fn reload(
    config_path: &std::path::Path,
    state_store: &StateStore,
    graph: &Arc<AsyncMutex<ServiceGraph>>,
    channel_task: &mut Option<tokio::task::JoinHandle<()>>,
    engine: &Arc<Engine>,
) -> anyhow::Result<()> {
    if let Some(task) = channel_task.take() {
        task.abort();
    }
    state_store.save(&*graph.lock().await)?;

    let loaded = crate::config::load(config_path)?;
    let mut new_graph = loaded.graph;
    state_store.load_into(&mut new_graph)?;

    {
        let mut guard = graph.lock().await;
        *guard = new_graph;
    }

    *channel_task = spawn_control_channel(loaded.control.as_ref(), graph.clone(), engine.clone())?;
    tracing::info!(path = %config_path.display(), "configuration reloaded");
    Ok(())
}

fn load_control_tls(tls: Option<&ControlTls>) -> anyhow::Result<Option<TlsServerContext>> {
    let Some(tls) = tls else { return Ok(None) };
    monit_core::tls::set_allow_self_signed(tls.allow_self_signed);
    let client_ca = tls.client_ca.clone().map(ClientCaSource::File);
    let ctx = TlsServerContext::new(&tls.cert, &tls.key, client_ca)?;
    Ok(Some(ctx))
}
