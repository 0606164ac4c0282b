//! `bwprobe`: copy bandwidth and latency between agent memory pools.
//!
//! ```text
//! USAGE:
//!   bwprobe                          All-pairs unidirectional, then bidirectional
//!   bwprobe topology                 Agents, pools, access and link matrices
//!   bwprobe copy -s 0 -d 1,2         Unidirectional copies
//!   bwprobe bidir 0,1,2              Bidirectional copies
//!   bwprobe all [--bidir]            All-pairs sweep
//!   bwprobe concurrent 0,1,2,3       Concurrent copies of pool pairs
//! ```
//!
//! Exit status is 0 on success, the first byte difference when validation
//! finds a mismatch, and 1 on any other error.

mod args;
mod report;

use anyhow::{Context, Result};
use args::{Cli, Cmd, RunOptions};
use bwprobe_core::{select_platform, PlatformSelection, Request, RunConfig, Session};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code.rem_euclid(256)).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    if let Some(Cmd::Version) = cli.command {
        report::print_version();
        return Ok(0);
    }

    let mut config = RunConfig::from_env();
    if cli.command.is_none() {
        config = config.with_default_run(true);
    }
    let platform = select_platform(PlatformSelection::Software(cli.options.fabric))?;
    let session = Session::open(platform, config).context("discovering agents and pools")?;

    let code = match &cli.command {
        Some(Cmd::Topology) => {
            cmd_topology(&session);
            0
        }
        Some(cmd) => match cmd.request() {
            Some(request) => cmd_benchmark(&session, &cli.options, request)?,
            None => 0,
        },
        None => cmd_default(&session, &cli.options)?,
    };

    session.close()?;
    Ok(code)
}

fn cmd_topology(session: &Session) {
    report::print_version();
    report::print_agents(session.catalog());
    report::print_access_matrix(session.topology());
    report::print_hops_matrix(session.topology());
    report::print_link_type_matrix(session.topology());
    report::print_weight_matrix(session.topology());
}

fn cmd_benchmark(session: &Session, options: &RunOptions, request: Request) -> Result<i32> {
    let request = options.apply(request);
    tracing::debug!("Request: {request:?}");
    let report = session
        .run(&request)
        .with_context(|| format!("{} failed", request.kind))?;
    report::print_report(session.catalog(), session.topology(), &report);
    Ok(report.exit_code)
}

fn cmd_default(session: &Session, options: &RunOptions) -> Result<i32> {
    let mut code = 0;
    for bidirectional in [false, true] {
        let pass = cmd_benchmark(session, options, Request::all_pairs(bidirectional))?;
        if code == 0 {
            code = pass;
        }
    }
    Ok(code)
}
