//! Command-line definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Leader election over a hierarchical coordination service
#[derive(Parser, Debug)]
#[command(name = "leader-election")]
#[command(version)]
#[command(about = "Predecessor-watch leader election")]
pub struct Cli {
    /// Enable debug output to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file (TOML); LEADER_ELECTION_* variables override it
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an in-process failover demonstration and print a JSON report
    Demo {
        /// Number of candidates to start
        #[arg(short = 'n', long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=64))]
        candidates: u32,

        /// Fail leaders by expiring their session instead of leaving
        #[arg(long)]
        expire: bool,

        /// Run a leader-only task on every candidate at this period
        #[arg(long, value_name = "MS")]
        task_period_ms: Option<u64>,
    },
    /// Print the effective configuration as JSON
    Config,
}
