use anyhow::Result;
use objstore::{config::AppConfig, routes, services::StorageService};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + recover-only flag ---
    let (cfg, recover_only) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting objstore with config: {:?}", cfg);

    // --- Open the store and repair interrupted puts ---
    let storage = StorageService::open(&cfg.root).await?;
    let report = storage.recover().await?;
    tracing::info!(
        "Recovery complete: {} completed, {} discarded, {} temp files removed",
        report.completed,
        report.discarded,
        report.temp_files_removed
    );

    if recover_only {
        return Ok(());
    }

    // --- Build router ---
    let app = routes::routes::app(storage);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
