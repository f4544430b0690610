//! Stats command - prints usage statistics as JSON

use clap::Args;

use crate::cli::{bootstrap, print_json};
use crate::domain::api_key::Environment;
use crate::domain::usage::StatisticsPeriod;
use crate::infrastructure::usage::UsageAnalytics;

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Calendar period for global statistics: day, week, month or year
    #[arg(long, default_value = "month")]
    pub period: StatisticsPeriod,

    /// Restrict global statistics to one environment
    #[arg(long)]
    pub environment: Option<Environment>,

    /// Print statistics for one user instead
    #[arg(long)]
    pub user: Option<String>,

    /// Trailing window for user statistics
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// Print the daily performance series over this many days instead
    #[arg(long)]
    pub performance_days: Option<u32>,
}

pub async fn run(args: StatsArgs) -> anyhow::Result<()> {
    let context = bootstrap().await?;
    let analytics = &context.analytics;

    if let Some(user) = &args.user {
        return print_json(&analytics.user_statistics(user, args.days).await?);
    }

    if let Some(days) = args.performance_days {
        return print_json(&analytics.performance_series(days).await?);
    }

    print_json(
        &analytics
            .global_statistics(args.period, args.environment)
            .await?,
    )
}
