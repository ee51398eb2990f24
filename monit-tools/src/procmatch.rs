//! # `monit-procmatch`: lists processes whose command line matches a pattern.
//!
//! Backs the `procmatch "<pattern>"` CLI action (spec §6): a standalone way
//! to try out a `Program`/`Process` service's match expression against the
//! live process table before committing it to a config file, the same
//! "does this even match anything" sanity check the original tool's
//! `procmatch` test binary provided.

#![forbid(unsafe_code)]

use clap::Parser;
use regex::Regex;
use sysinfo::System;

#[derive(Parser, Debug)]
#[command(name = "monit-procmatch", version, about = "Lists running processes whose command line matches a regex pattern")]
struct Args {
    /// Extended regular expression matched against each process's full command line.
    pattern: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let re = Regex::new(&args.pattern)?;

    let mut system = System::new_all();
    system.refresh_all();

    let mut matched = 0usize;
    for (pid, process) in system.processes() {
        let cmdline = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        let haystack = if cmdline.is_empty() { process.name().to_string_lossy().to_string() } else { cmdline };
        if re.is_match(&haystack) {
            println!("{:>8}  {}", pid, haystack);
            matched += 1;
        }
    }

    if matched == 0 {
        eprintln!("no process matched pattern '{}'", args.pattern);
        std::process::exit(1);
    }
    Ok(())
}
