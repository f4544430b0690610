//! Prune-logs command - usage log retention

use clap::Args;

use crate::cli::bootstrap;
use crate::infrastructure::usage::{
    UsageAnalytics, DEFAULT_PRUNE_BATCH_SIZE, DEFAULT_RETENTION_DAYS,
};

#[derive(Debug, Args)]
pub struct PruneLogsArgs {
    /// Delete entries older than this many days
    #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
    pub days: u32,

    /// Rows deleted per batch
    #[arg(long, default_value_t = DEFAULT_PRUNE_BATCH_SIZE)]
    pub batch_size: usize,

    /// Only count what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: PruneLogsArgs) -> anyhow::Result<()> {
    let context = bootstrap().await?;

    let report = context
        .analytics
        .prune_older_than(args.days, args.batch_size, args.dry_run)
        .await?;

    if report.dry_run {
        println!(
            "Would delete {} usage log(s) created before {}",
            report.deleted, report.cutoff
        );
    } else {
        println!(
            "Deleted {} usage log(s) created before {}",
            report.deleted, report.cutoff
        );
    }

    Ok(())
}
