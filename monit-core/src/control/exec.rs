//! Child-process execution for `_doStart`/`_doStop`/`_doRestart`: spawns
//! the configured command with the augmented environment, polls for exit
//! every 100ms while the budget remains and the daemon is not stopping,
//! captures a reportable message, and (for `Process` services) confirms
//! the observable liveness transition described in spec §4.F.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::sleep;

use crate::model::{Command, ServiceFacts};

/// Cap on captured stdout+stderr kept for the reportable message, matching
/// the spec's "up to 2048 bytes total while debug is on".
const CAPTURE_CAP: usize = 2048;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Disposition of one executed lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Succeeded(String),
    Failed(String, String),
    TimedOut(String),
}

/// Runs `cmd` for `service`, reporting a MONIT_EVENT of `which` ("start",
/// "stop", "restart") and observing post-exit liveness for `Process`
/// services.
pub async fn run(
    cmd: &Command,
    service: &str,
    which: &str,
    host: &str,
    facts: &ServiceFacts,
    is_process: bool,
    stopped: Arc<AtomicBool>,
) -> ExecOutcome {
    let mut command = TokioCommand::new(cmd.program());
    command.args(&cmd.argv[1..]);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    apply_environment(&mut command, service, which, host, facts, is_process);

    #[cfg(unix)]
    {
        if let Some(uid) = cmd.uid {
            command.uid(uid);
        }
        if let Some(gid) = cmd.gid {
            command.gid(gid);
        }
    }

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => return ExecOutcome::Failed("-".into(), format!("program '{}' failed: {e}", cmd.program())),
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut captured = Vec::new();

    let start = Instant::now();
    let outcome = loop {
        if let Some(err) = &mut stderr {
            drain_into(err, &mut captured).await;
        }
        if let Some(out) = &mut stdout {
            drain_into(out, &mut captured).await;
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let message = String::from_utf8_lossy(&captured).into_owned();
                break if status.success() {
                    ExecOutcome::Succeeded(message)
                } else {
                    let code = status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into());
                    ExecOutcome::Failed(code, message)
                };
            }
            Ok(None) => {
                if start.elapsed() >= cmd.timeout || stopped.load(Ordering::Relaxed) {
                    let message = String::from_utf8_lossy(&captured).into_owned();
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break ExecOutcome::TimedOut(format!("program '{}' timed out: {message}", cmd.program()));
                }
            }
            Err(e) => break ExecOutcome::Failed("-".into(), format!("wait() failed: {e}")),
        }
        sleep(POLL_INTERVAL).await;
    };

    if is_process && matches!(outcome, ExecOutcome::Succeeded(_)) {
        match which {
            "start" | "restart" => {
                let _ = wait_start(facts.pid, cmd.timeout).await;
            }
            "stop" => {
                let _ = wait_stop(facts.pid).await;
            }
            _ => {}
        }
    }

    outcome
}

async fn drain_into(stream: &mut (impl AsyncReadExt + Unpin), captured: &mut Vec<u8>) {
    if captured.len() >= CAPTURE_CAP {
        return;
    }
    let mut buf = [0u8; 256];
    // A single non-blocking-shaped read attempt per poll tick; the pipe is
    // drained incrementally across iterations rather than all at once so a
    // chatty child cannot block the timeout-polling loop.
    if let Ok(Ok(n)) = tokio::time::timeout(Duration::from_millis(1), stream.read(&mut buf)).await {
        if n > 0 {
            let take = n.min(CAPTURE_CAP.saturating_sub(captured.len()));
            captured.extend_from_slice(&buf[..take]);
        }
    }
}

fn apply_environment(
    command: &mut TokioCommand,
    service: &str,
    which: &str,
    host: &str,
    facts: &ServiceFacts,
    is_process: bool,
) {
    command.env("MONIT_DATE", chrono::Utc::now().to_rfc2822());
    command.env("MONIT_SERVICE", service);
    command.env("MONIT_HOST", host);
    command.env("MONIT_EVENT", which);
    command.env("MONIT_DESCRIPTION", format!("{service} {which}"));
    if is_process {
        if let Some(pid) = facts.pid {
            command.env("MONIT_PROCESS_PID", pid.to_string());
        }
        if let Some(mem) = facts.memory_kb {
            command.env("MONIT_PROCESS_MEMORY", mem.to_string());
        }
        command.env("MONIT_PROCESS_CHILDREN", facts.children.to_string());
        if let Some(cpu) = facts.cpu_percent {
            command.env("MONIT_PROCESS_CPU_PERCENT", format!("{cpu:.1}"));
        }
    }
}

/// `_waitStart`: polls "is this pid (including children) running" with
/// backoff 50ms -> 100ms -> ... doubling to a 1s ceiling, bounded by
/// `budget`.
pub async fn wait_start(pid: Option<u32>, budget: Duration) -> bool {
    let Some(pid) = pid else { return false };
    let mut backoff = Duration::from_millis(50);
    let deadline = Instant::now() + budget;
    loop {
        if is_process_running(pid, true) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
        backoff = (backoff * 2).min(Duration::from_secs(1));
    }
}

/// `_waitStop`: polls `getpgid(pid)` at a fixed 100ms cadence until it
/// returns "no such process" (`ESRCH`), matching the spec's
/// `errno != EPERM` check.
pub async fn wait_stop(pid: Option<u32>) -> bool {
    let Some(pid) = pid else { return true };
    // Bounded by a generous ceiling so a runaway process can't hang the
    // control walk forever; the caller's own command timeout already
    // bounded the stop command itself.
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if !process_group_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(unix)]
fn process_group_exists(pid: u32) -> bool {
    use nix::unistd::{getpgid, Pid};
    match getpgid(Some(Pid::from_raw(pid as i32))) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // Any other errno (e.g. EPERM) means the process still exists.
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn process_group_exists(_pid: u32) -> bool {
    false
}

fn is_process_running(pid: u32, include_children: bool) -> bool {
    let mut system = sysinfo::System::new_all();
    system.refresh_all();
    let sys_pid = sysinfo::Pid::from_u32(pid);
    if system.process(sys_pid).is_some() {
        return true;
    }
    if include_children {
        return system.processes().values().any(|p| p.parent() == Some(sys_pid));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn true_command_succeeds() {
        let cmd = Command::new(vec!["true".into()], None, None, Duration::from_secs(5));
        let facts = ServiceFacts::default();
        let outcome = run(&cmd, "svc", "start", "host", &facts, false, Arc::new(AtomicBool::new(false))).await;
        assert!(matches!(outcome, ExecOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn false_command_reports_nonzero_exit() {
        let cmd = Command::new(vec!["false".into()], None, None, Duration::from_secs(5));
        let facts = ServiceFacts::default();
        let outcome = run(&cmd, "svc", "stop", "host", &facts, false, Arc::new(AtomicBool::new(false))).await;
        assert!(matches!(outcome, ExecOutcome::Failed(_, _)));
    }

    #[tokio::test]
    async fn missing_binary_fails_without_hanging() {
        let cmd = Command::new(vec!["/no/such/program-xyz".into()], None, None, Duration::from_secs(5));
        let facts = ServiceFacts::default();
        let outcome = run(&cmd, "svc", "start", "host", &facts, false, Arc::new(AtomicBool::new(false))).await;
        assert!(matches!(outcome, ExecOutcome::Failed(_, _)));
    }

    #[tokio::test]
    async fn sleep_command_times_out() {
        let cmd = Command::new(
            vec!["sleep".into(), "10".into()],
            None,
            None,
            Duration::from_millis(150),
        );
        let facts = ServiceFacts::default();
        let start = Instant::now();
        let outcome = run(&cmd, "svc", "start", "host", &facts, false, Arc::new(AtomicBool::new(false))).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(matches!(outcome, ExecOutcome::TimedOut(_)));
    }

    #[tokio::test]
    async fn wait_stop_with_no_pid_is_immediate() {
        assert!(wait_stop(None).await);
    }
}
