use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod inventory;
mod learnswitch;
mod util;
mod vim;

use cli::{ArgProblem, RootArgs};
use config::RunConfig;
use learnswitch::RunPlan;
use vim::{HttpTransport, Transport, VimClient};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.debug);

    let target = match args.target() {
        Ok(target) => target,
        Err(ArgProblem::NoTarget) => {
            println!("{}", cli::usage());
            return ExitCode::SUCCESS;
        }
        Err(ArgProblem::Invalid(message)) => {
            println!("ERROR: {message}");
            println!();
            println!("{}", cli::usage());
            return ExitCode::FAILURE;
        }
    };

    match run(&args, &target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &RootArgs, target: &cli::Target) -> Result<()> {
    let config = RunConfig::from_env(args, target)?;
    let plan = RunPlan {
        dvs_name: target.dvs_name.clone(),
        host_ip: target.host_ip.to_string(),
        portgroups: config.portgroups.clone(),
        action: target.action,
        task_timeout: config.task_timeout,
    };

    let mut client = VimClient::new(HttpTransport::new(&config.endpoint));
    client
        .connect(&config.credentials.user, &config.credentials.password)
        .with_context(|| format!("connect to {}", config.endpoint.url()))?;

    apply(
        &client,
        &plan,
        args.json,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
}

/// Run the plan on a logged-in client, log out, and emit the report.
///
/// With `json` the INFO lines go to `err` and the change report to `out`, so
/// `out` stays parseable.
fn apply<T: Transport>(
    client: &VimClient<T>,
    plan: &RunPlan,
    json: bool,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    let progress: &mut dyn Write = if json { &mut *err } else { &mut *out };
    let result = learnswitch::run(client, plan, progress);

    if let Err(error) = client.logout() {
        tracing::warn!(error = %error, "logout failed");
    }

    let changes = result?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &changes).context("write JSON report")?;
        writeln!(out)?;
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "warn,learnswitch_cfg=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
