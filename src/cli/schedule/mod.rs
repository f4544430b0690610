//! Schedule command - runs maintenance jobs until interrupted

use tokio::signal;
use tracing::{error, info};

use crate::cli::bootstrap;

pub async fn run() -> anyhow::Result<()> {
    let context = bootstrap().await?;

    context.sweeper.run_until(shutdown_signal()).await;
    info!("Scheduler shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping scheduler");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping scheduler");
        }
    }
}
