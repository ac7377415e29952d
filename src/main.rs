use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chore_sync::api::router;
use chore_sync::config::AppConfig;
use chore_sync::connectivity::{Connectivity, spawn_http_probe};
use chore_sync::db;
use chore_sync::notifier::{ChangeBus, ChangeNotifier};
use chore_sync::remote::{HttpRemoteClient, RemoteClient};
use chore_sync::services::{SyncEngine, SyncTrigger, SyncTriggers};
use chore_sync::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chore_sync=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config.database_url).await?;

    let http = Arc::new(HttpRemoteClient::new(config.remote.clone())?);
    let connectivity = Connectivity::new(http.probe().await);
    let probe = spawn_http_probe(connectivity.clone(), http.clone(), config.probe_interval);

    let remote: Arc<dyn RemoteClient> = http;
    let engine = Arc::new(SyncEngine::new(pool, remote, connectivity).await?);

    let mut triggers = SyncTriggers::new()
        .on_reconnect(engine.clone())
        .periodic(engine.clone(), config.sync_interval_secs);

    let notifier = match &config.notifier {
        Some(notifier_config) => {
            let notifier = ChangeNotifier::new(notifier_config.clone(), ChangeBus::new());
            triggers = triggers.on_push(engine.clone(), notifier.subscribe());
            notifier.open().await;
            Some(notifier)
        }
        None => None,
    };

    match engine.sync_and_refresh(SyncTrigger::Startup).await {
        Ok((outcome, stats)) => info!("startup sync: {:?}, {:?}", outcome, stats),
        Err(e) => warn!("startup sync failed: {:?}", e),
    }

    let app = router(AppState {
        engine: engine.clone(),
    });

    info!("listening on http://{}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(notifier) = notifier {
        notifier.close().await;
    }
    triggers.shutdown();
    probe.abort();
    info!("shut down");

    Ok(())
}
