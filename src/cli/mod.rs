//! CLI module for PMP API Credentials
//!
//! Provides maintenance and inspection subcommands:
//! - `sweep`: expire overdue keys and reclaim rate-limit buckets once
//! - `schedule`: run the maintenance jobs until interrupted
//! - `prune-logs`: apply the usage log retention policy
//! - `stats`: print usage statistics
//! - `issue`: create or rotate a key pair

pub mod issue;
pub mod prune_logs;
pub mod schedule;
pub mod stats;
pub mod sweep;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;
use crate::AppContext;

/// PMP API Credentials - key pair lifecycle and usage accounting
#[derive(Parser)]
#[command(name = "pmp-api-credentials")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Expire overdue keys and reclaim stale rate-limit buckets once
    Sweep(sweep::SweepArgs),

    /// Run sweep, log retention and weekly report on a schedule
    Schedule,

    /// Delete usage logs older than the retention window
    PruneLogs(prune_logs::PruneLogsArgs),

    /// Print usage statistics as JSON
    Stats(stats::StatsArgs),

    /// Create or rotate a key pair and print its tokens
    Issue(issue::IssueArgs),
}

/// Load configuration, install logging and wire the services
pub async fn bootstrap() -> anyhow::Result<AppContext> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);

    AppContext::from_config(config).await
}

/// Print a value as pretty JSON on stdout
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
