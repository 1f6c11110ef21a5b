use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use offcache::{CacheWorker, Config, HttpFetcher, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(std::env::args_os().nth(1).map(PathBuf::from)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "offcache exited");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::discover(config_path)?;
    info!(
        version = %config.version,
        upstream = %config.upstream,
        assets = config.assets.len(),
        "configuration loaded"
    );

    let worker = Arc::new(CacheWorker::new(
        config.worker_settings()?,
        config.storage.build(),
        Arc::new(HttpFetcher::new(config.upstream_origin()?)?),
    ));

    // Either failure exits; the next start retries the step.
    worker.install().await?;
    worker.activate().await?;

    let server = Server::bind(&config.listen).await?;
    server
        .serve_with_shutdown(worker, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
