//! Sweep command - one expiry sweep plus the bucket janitor

use clap::Args;

use crate::cli::{bootstrap, print_json};
use crate::infrastructure::sweeper::MaintenanceRun;

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Only sweep this key id
    #[arg(long)]
    pub key: Option<String>,
}

pub async fn run(args: SweepArgs) -> anyhow::Result<()> {
    let context = bootstrap().await?;

    let run = match &args.key {
        Some(key) => MaintenanceRun {
            expiry: Some(context.credentials.sweep_expired(Some(key)).await?),
            ..MaintenanceRun::default()
        },
        None => context.sweeper.run_once().await,
    };

    if let Some(report) = &run.expiry {
        println!(
            "Checked {} key(s), expired {}, skipped {}, {} error(s)",
            report.total_checked,
            report.expired_count,
            report.skipped_count,
            report.errors.len()
        );

        for failure in &report.errors {
            println!("  failed {}: {}", failure.key_id, failure.error);
        }

        if !report.expired.is_empty() {
            print_json(&report.expired)?;
        }
    }

    if let Some(reclaimed) = run.reclaimed_buckets {
        println!("Reclaimed {} stale rate-limit bucket(s)", reclaimed);
    }

    for failure in &run.failures {
        println!("Failed: {}", failure);
    }

    if !run.is_clean() {
        anyhow::bail!("Sweep finished with errors");
    }

    Ok(())
}
