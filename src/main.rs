//! Catalog sync engine entry point
//!
//! Reads `CATALOG_SYNC_*` settings from the environment, wires the provider,
//! store and notifier together, and runs until interrupted.

use anyhow::Context;
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::HttpClient;
use core_library::{create_pool, DatabaseConfig, SqliteItemRepository};
use core_metadata::{AniListProvider, ApiClient, CatalogProvider, MangaDexProvider, RateLimiter};
use core_runtime::logging::{init_logging, redact_url};
use core_runtime::{HttpNotifier, NoopNotifier, Notifier, ProviderKind, SyncEngineConfig};
use core_sync::{OrchestratorConfig, SqliteSyncStateRepository, SyncOrchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncEngineConfig::from_env().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_logging(config.logging.clone()).context("initializing logging")?;

    info!(
        provider = config.provider.as_str(),
        database = %redact_url(&config.database_url),
        workers = config.workers,
        requests_per_second = config.rate_limit.requests_per_second,
        burst = config.rate_limit.burst,
        "Starting catalog sync engine"
    );

    let pool = create_pool(DatabaseConfig::new(&config.database_url))
        .await
        .context("opening catalog database")?;

    let http: Arc<dyn HttpClient> = Arc::new(
        ReqwestHttpClient::with_timeout(config.retry.request_timeout)
            .context("building HTTP client")?,
    );
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let api = ApiClient::new(http.clone(), limiter, config.retry.clone());

    let provider: Arc<dyn CatalogProvider> = match config.provider {
        ProviderKind::AniList => Arc::new(AniListProvider::new(api)),
        ProviderKind::MangaDex => Arc::new(MangaDexProvider::new(api)),
    };

    let notifier_cancel = CancellationToken::new();
    let (notifier, dispatcher): (Arc<dyn Notifier>, _) = if config.notifier.is_enabled() {
        let (notifier, handle) =
            HttpNotifier::spawn(config.notifier.clone(), http, notifier_cancel.clone());
        (Arc::new(notifier), Some(handle))
    } else {
        info!("No notification endpoints configured");
        (Arc::new(NoopNotifier), None)
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        provider,
        Arc::new(SqliteItemRepository::new(pool.clone())),
        Arc::new(SqliteSyncStateRepository::new(pool.clone())),
        notifier,
        OrchestratorConfig::from_engine(&config),
    ));

    for state in orchestrator.status().await.context("reading sync state")? {
        info!(
            operation = %state.operation,
            status = %state.status,
            cursor = ?state.cursor,
            last_success_at = ?state.last_success_at,
            "Sync state"
        );
    }

    let cancel = CancellationToken::new();
    let runner = tokio::spawn(orchestrator.run(cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => warn!(error = %e, "Unable to listen for shutdown signal, stopping"),
    }

    cancel.cancel();
    if let Err(e) = runner.await {
        error!(error = %e, "Orchestrator task terminated abnormally");
    }

    notifier_cancel.cancel();
    if let Some(handle) = dispatcher {
        if let Err(e) = handle.await {
            error!(error = %e, "Notification dispatcher terminated abnormally");
        }
    }

    pool.close().await;
    info!("Catalog sync engine stopped");
    Ok(())
}
