use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livewatch::config::AppConfig;
use livewatch::logging::init_logging;
use livewatch::service::WatchService;
use livewatch::store::SqliteStore;
use livewatch::utils::http_client::install_rustls_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env_or_default();

    // Initialize logging; keep the guard alive until exit
    let (logging, _guard) = init_logging(&config.log_dir.to_string_lossy())?;
    install_rustls_provider();

    info!(
        roster = %config.roster_path.display(),
        poll_interval = ?config.poll_interval,
        "livewatch starting"
    );

    // Initialize database
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);

    let background = CancellationToken::new();
    logging.attach_diagnostics_sink(
        store.clone(),
        config.diagnostics_min_level,
        config.diagnostics_retention(),
        background.clone(),
    );
    logging.start_retention_cleanup(background.clone());

    let service = Arc::new(WatchService::from_config(&config, store.clone(), store.clone())?);
    let report = service.reload(&config.roster_path).await?;
    info!(
        creators = report.creators.spawned,
        bindings = report.bindings.spawned,
        unusable = report.bindings.unusable,
        "Roster loaded"
    );

    let reload = service.spawn_roster_reload(config.roster_path.clone(), config.roster_reload);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.shutdown().await;
    if let Err(e) = reload.await {
        warn!("Roster reload task failed: {}", e);
    }
    background.cancel();
    store.pool().close().await;

    info!("livewatch stopped");
    Ok(())
}
