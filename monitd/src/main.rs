//! # monitd
//!
//! Entry point: parses the CLI (spec §6), handles the small number of
//! one-shot actions that never touch the daemon (`-H`, `--id`,
//! `--resetid`, `-t`), then either runs the daemon in place or acts as a
//! client issuing one request against an already-running daemon's control
//! channel — mirroring the original tool's single-binary split between
//! "start the monitor" and "tell the running monitor to do something".

mod channel;
mod cli;
mod client;
mod config;
mod daemon;
mod logging;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::Parser;
use monit_core::control::ControlAction;
use sha1::{Digest, Sha1};

use cli::{Action, Cli, Target};
use config::ControlSettings;
use logging::LogTarget;

const DEFAULT_CONFIG: &str = "/etc/monitd.toml";
const DEFAULT_STATEFILE: &str = "/var/lib/monitd/state.json";
const DEFAULT_PIDFILE: &str = "/var/run/monitd.pid";

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Some(file) = &cli.hash {
        return match run_hash(file) {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("monitd: {e}");
                std::process::ExitCode::FAILURE
            }
        };
    }

    if cli.show_id || cli.reset_id {
        return match run_id(&cli) {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("monitd: {e}");
                std::process::ExitCode::FAILURE
            }
        };
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("monitd: failed to start async runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cli)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("monitd: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let loaded = config::load(&config_path)?;

    if cli.syntax_check {
        println!("'{}' syntax OK, {} service(s) defined", config_path.display(), loaded.graph.services.len());
        return Ok(());
    }

    let action = cli.action().map_err(anyhow::Error::msg)?;

    if let Some(action) = action {
        return run_action(&cli, loaded.control, &loaded.graph, action).await;
    }

    let log_target = match cli.logfile.as_deref().or(loaded.daemon.logfile.as_deref()) {
        Some("syslog") => LogTarget::Syslog,
        Some(path) => LogTarget::File(Path::new(path)),
        None => LogTarget::Stderr,
    };
    let _guard = logging::init(log_target, cli.verbose, cli.foreground);

    let statefile = cli.statefile.clone().or(loaded.daemon.statefile.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_STATEFILE));
    let pidfile = cli.pidfile.clone().or(loaded.daemon.pidfile.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_PIDFILE));
    write_pidfile(&pidfile)?;

    let polltime = std::time::Duration::from_secs(cli.polltime.unwrap_or(loaded.daemon.polltime));

    let ctx = daemon::DaemonContext {
        daemon: loaded.daemon,
        control: loaded.control,
        graph: loaded.graph,
        statefile,
        polltime,
        config_path,
    };

    let result = daemon::run(ctx).await;
    std::fs::remove_file(&pidfile).ok();
    result
}

/// Dispatches a parsed CLI [`Action`] as a control-channel request (or, for
/// `procmatch`, as a local process-table scan needing no running daemon).
async fn run_action(
    cli: &Cli,
    control: Option<ControlSettings>,
    graph: &monit_core::model::ServiceGraph,
    action: Action,
) -> anyhow::Result<()> {
    if let Action::Procmatch(pattern) = &action {
        return run_procmatch(pattern);
    }

    let Some(control) = control else {
        anyhow::bail!("no [control] section is configured; cannot reach a running daemon");
    };

    let (service, control_action) = match action {
        Action::Start(target) => (resolve_target(target), ControlAction::Start),
        Action::Stop(target) => (resolve_target(target), ControlAction::Stop),
        Action::Restart(target) => (resolve_target(target), ControlAction::Restart),
        Action::Monitor(target) => (resolve_target(target), ControlAction::Monitor),
        Action::Unmonitor(target) => (resolve_target(target), ControlAction::Unmonitor),
        Action::Status | Action::Summary | Action::Reload | Action::Validate => {
            println!("'{}' is reported by the running daemon's logs; no dedicated control-channel query is implemented", verb_name(&action));
            return Ok(());
        }
        Action::Quit => return send_quit(),
        Action::Procmatch(_) => unreachable!("handled above"),
    };

    // `-g <group>` expands the group's members here, client-side, into one
    // control-channel request per member — the wire protocol (spec §4.G)
    // only ever names a single service per request.
    if let Some(group_name) = &cli.group {
        let group = graph
            .groups
            .get(group_name)
            .ok_or_else(|| anyhow::anyhow!("no such group '{group_name}'"))?;
        let mut failures = Vec::new();
        for member in &group.members {
            match client::send_with_timeout(&control, member, control_action).await {
                Ok(()) => println!("OK: {} {}", verb_name_for(control_action), member),
                Err(e) => failures.push(format!("{member}: {e}")),
            }
        }
        if !failures.is_empty() {
            anyhow::bail!("{} of {} group member(s) failed: {}", failures.len(), group.members.len(), failures.join("; "));
        }
        return Ok(());
    }

    client::send_with_timeout(&control, &service, control_action)
        .await
        .map_err(anyhow::Error::msg)?;
    println!("OK: {} {}", verb_name_for(control_action), service);
    Ok(())
}

fn resolve_target(target: Target) -> String {
    match target {
        Target::Service(name) => name,
        Target::All => "all".to_string(),
    }
}

fn verb_name(action: &Action) -> &'static str {
    match action {
        Action::Status => "status",
        Action::Summary => "summary",
        Action::Reload => "reload",
        Action::Validate => "validate",
        _ => "action",
    }
}

fn verb_name_for(action: ControlAction) -> &'static str {
    match action {
        ControlAction::Start => "start",
        ControlAction::Stop => "stop",
        ControlAction::Restart => "restart",
        ControlAction::Monitor => "monitor",
        ControlAction::Unmonitor => "unmonitor",
    }
}

/// `quit` asks the locally running daemon to exit by signaling the PID
/// recorded in its pidfile, the same mechanism the original tool used
/// rather than a dedicated control-channel verb (spec's five control
/// actions do not include `quit`).
fn send_quit() -> anyhow::Result<()> {
    let pidfile = PathBuf::from(DEFAULT_PIDFILE);
    let raw = std::fs::read_to_string(&pidfile)
        .map_err(|e| anyhow::anyhow!("cannot read pidfile {}: {e}", pidfile.display()))?;
    let pid: i32 = raw.trim().parse().map_err(|_| anyhow::anyhow!("pidfile {} does not contain a PID", pidfile.display()))?;

    #[cfg(unix)]
    {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM)
            .map_err(|e| anyhow::anyhow!("failed to signal pid {pid}: {e}"))?;
    }
    println!("sent SIGTERM to monitd (pid {pid})");
    Ok(())
}

fn run_procmatch(pattern: &str) -> anyhow::Result<()> {
    let status = std::process::Command::new("monit-procmatch").arg(pattern).status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => anyhow::bail!("monit-procmatch exited with {status}"),
        Err(e) => anyhow::bail!("failed to run monit-procmatch: {e} (is it installed alongside monitd?)"),
    }
}

fn run_hash(file: &str) -> anyhow::Result<()> {
    let bytes = if file == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        std::fs::read(file)?
    };

    let sha1 = {
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        hasher.finalize()
    };
    let md5 = {
        let mut hasher = md5::Md5::new();
        hasher.update(&bytes);
        hasher.finalize()
    };
    println!("SHA1 ({file}) = {}", hex::encode(sha1));
    println!("MD5  ({file}) = {}", hex::encode(md5));
    Ok(())
}

/// `--id`/`--resetid`: a stable per-host identifier derived from the
/// hostname, stored alongside the state file so it survives restarts.
/// `--resetid` regenerates it from the current wall-clock-independent
/// machine identity (hostname plus a fresh random suffix).
fn run_id(cli: &Cli) -> anyhow::Result<()> {
    let id_path = cli
        .statefile
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATEFILE))
        .with_file_name("monitd.id");

    if cli.reset_id {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let suffix: u64 = rand::random();
        let id = format!("{hostname}-{suffix:016x}");
        if let Some(dir) = id_path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        std::fs::write(&id_path, &id)?;
        println!("{id}");
        return Ok(());
    }

    match std::fs::read_to_string(&id_path) {
        Ok(id) => println!("{}", id.trim()),
        Err(_) => anyhow::bail!("no client id has been generated yet; run with --resetid first"),
    }
    Ok(())
}

fn write_pidfile(path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    std::fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}
