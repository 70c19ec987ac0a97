//! leader-election - command-line front end for the leader election library.
//!
//! Commands:
//! - `leader-election demo [-n N] [--expire] [--task-period-ms MS]`: run an
//!   in-process failover walkthrough and print a JSON report
//! - `leader-election config`: print the effective configuration as JSON
//!
//! Exit codes:
//! - 0: Success
//! - 1: Error

use std::time::Duration;

use clap::Parser;
use leader_election::ElectionConfig;
use tracing_subscriber::EnvFilter;

mod cli;
mod demo;

use cli::{Cli, Commands};
use demo::{DemoOptions, Failure};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("leader_election=debug,leader_election_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ElectionConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo {
            candidates,
            expire,
            task_period_ms,
        } => {
            let options = DemoOptions {
                candidates,
                failure: if expire { Failure::Expire } else { Failure::Leave },
                task_period: task_period_ms.map(Duration::from_millis),
            };
            let report = demo::run(config, options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
