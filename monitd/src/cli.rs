//! Command-line surface, matching spec §6 verbatim:
//!
//! ```text
//! <prog> [options] [action [service|all]]
//! Options: -c <conf>, -d <seconds>, -g <group>, -l <logfile|syslog>, -p <pidfile>,
//!          -s <statefile>, -I (no daemonize), -t (syntax check), -v (verbose, repeatable),
//!          -H [file] (print SHA1+MD5 of file or stdin, then exit),
//!          --id, --resetid, -V, -h.
//! Actions: start|stop|restart|monitor|unmonitor <name|all>, reload, status, summary,
//!          quit, validate, procmatch "<pattern>".
//! ```

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "monitd", version, about = "Dependency-aware service monitoring daemon")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the validator cycle length, in seconds.
    #[arg(short = 'd', value_name = "SECONDS")]
    pub polltime: Option<u64>,

    /// Restricts a start/stop/.../action to members of a named group.
    #[arg(short = 'g', value_name = "GROUP")]
    pub group: Option<String>,

    /// Log destination: a file path, or the literal `syslog`.
    #[arg(short = 'l', value_name = "LOGFILE")]
    pub logfile: Option<String>,

    /// Overrides the configured PID file path.
    #[arg(short = 'p', value_name = "PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Overrides the configured state-snapshot file path.
    #[arg(short = 's', value_name = "STATEFILE")]
    pub statefile: Option<PathBuf>,

    /// Runs in the foreground instead of daemonizing.
    #[arg(short = 'I')]
    pub foreground: bool,

    /// Parses and validates the configuration, then exits.
    #[arg(short = 't')]
    pub syntax_check: bool,

    /// Increases log verbosity; may be repeated (-vvv).
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Prints the SHA1 and MD5 digest of FILE (or stdin if omitted/`-`), then exits.
    #[arg(short = 'H', value_name = "FILE", num_args = 0..=1, default_missing_value = "-")]
    pub hash: Option<String>,

    /// Prints this host's client identifier and exits.
    #[arg(long = "id")]
    pub show_id: bool,

    /// Regenerates this host's client identifier and exits.
    #[arg(long = "resetid")]
    pub reset_id: bool,

    /// `action [service|all|"pattern"]`, e.g. `start web`, `procmatch "java.*"`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub action_args: Vec<String>,
}

/// The action grammar from spec §6, parsed out of `action_args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start(Target),
    Stop(Target),
    Restart(Target),
    Monitor(Target),
    Unmonitor(Target),
    Reload,
    Status,
    Summary,
    Quit,
    Validate,
    Procmatch(String),
}

/// What an action's service argument resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Service(String),
    All,
}

impl Cli {
    /// Parses `action_args` into an [`Action`], if one was given. Returns
    /// `Ok(None)` when the daemon should simply start running (no action
    /// argument at all).
    pub fn action(&self) -> Result<Option<Action>, String> {
        let Some(verb) = self.action_args.first() else {
            return Ok(None);
        };
        let rest = &self.action_args[1..];

        let target = |rest: &[String]| -> Result<Target, String> {
            match rest.first() {
                Some(s) if s == "all" => Ok(Target::All),
                Some(s) => Ok(Target::Service(s.clone())),
                // `-g <group>` supplies the target set in place of a bare service name.
                None if self.group.is_some() => Ok(Target::All),
                None => Err(format!("action '{verb}' requires a service name or 'all'")),
            }
        };

        Ok(Some(match verb.as_str() {
            "start" => Action::Start(target(rest)?),
            "stop" => Action::Stop(target(rest)?),
            "restart" => Action::Restart(target(rest)?),
            "monitor" => Action::Monitor(target(rest)?),
            "unmonitor" => Action::Unmonitor(target(rest)?),
            "reload" => Action::Reload,
            "status" => Action::Status,
            "summary" => Action::Summary,
            "quit" => Action::Quit,
            "validate" => Action::Validate,
            "procmatch" => {
                let pattern = rest.first().ok_or("action 'procmatch' requires a pattern argument")?;
                Action::Procmatch(pattern.clone())
            }
            other => return Err(format!("unknown action '{other}'")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_service() {
        let cli = Cli::parse_from(["monitd", "start", "web"]);
        assert_eq!(cli.action().unwrap(), Some(Action::Start(Target::Service("web".into()))));
    }

    #[test]
    fn parses_start_all() {
        let cli = Cli::parse_from(["monitd", "start", "all"]);
        assert_eq!(cli.action().unwrap(), Some(Action::Start(Target::All)));
    }

    #[test]
    fn parses_bare_actions() {
        let cli = Cli::parse_from(["monitd", "status"]);
        assert_eq!(cli.action().unwrap(), Some(Action::Status));
    }

    #[test]
    fn parses_procmatch_pattern() {
        let cli = Cli::parse_from(["monitd", "procmatch", "java.*"]);
        assert_eq!(cli.action().unwrap(), Some(Action::Procmatch("java.*".into())));
    }

    #[test]
    fn start_without_target_is_an_error() {
        let cli = Cli::parse_from(["monitd", "start"]);
        assert!(cli.action().is_err());
    }

    #[test]
    fn start_without_target_but_with_group_defaults_to_all() {
        let cli = Cli::parse_from(["monitd", "-g", "backend", "start"]);
        assert_eq!(cli.action().unwrap(), Some(Action::Start(Target::All)));
    }

    #[test]
    fn no_action_args_means_run_the_daemon() {
        let cli = Cli::parse_from(["monitd", "-I"]);
        assert_eq!(cli.action().unwrap(), None);
    }

    #[test]
    fn hash_flag_defaults_to_stdin() {
        let cli = Cli::parse_from(["monitd", "-H"]);
        assert_eq!(cli.hash.as_deref(), Some("-"));
    }
}
