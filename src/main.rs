use clap::Parser;
use pmp_api_credentials::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sweep(args) => cli::sweep::run(args).await,
        Command::Schedule => cli::schedule::run().await,
        Command::PruneLogs(args) => cli::prune_logs::run(args).await,
        Command::Stats(args) => cli::stats::run(args).await,
        Command::Issue(args) => cli::issue::run(args).await,
    }
}
