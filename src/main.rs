use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pinglog::analytics::{CountryResolver, GeoIpService, PingRecorder};
use pinglog::api::{self, AppState};
use pinglog::config::Config;
use pinglog::storage::{CachedIdentityStore, IdentityStore, SqliteStorage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Durable identity set
    info!("Using SQLite identity store: {}", config.database.url);
    let sqlite: Arc<dyn IdentityStore> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );
    let identities: Arc<dyn IdentityStore> = Arc::new(CachedIdentityStore::new(
        sqlite,
        config.database.identity_cache_entries,
    ));
    identities.init().await?;
    info!("Identity store initialized successfully");

    tokio::fs::create_dir_all(&config.analytics.data_dir).await?;
    info!(
        "📊 Analytics data directory: {}",
        config.analytics.data_dir.display()
    );

    let geoip: Option<Arc<dyn CountryResolver>> =
        GeoIpService::open_optional(config.analytics.geoip_country_db_path.as_deref())
            .map(|service| Arc::new(service) as Arc<dyn CountryResolver>);
    if geoip.is_some() {
        info!("🌍 GeoIP country lookup enabled");
    } else {
        info!("🌍 GeoIP unavailable, countries will be recorded as XX");
    }

    let recorder = Arc::new(PingRecorder::from_config(&config.analytics, identities));

    // Daily summary regeneration
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let report_task = recorder.aggregator().start_report_task(
        config.analytics.report_hour_utc,
        config.analytics.report_max_days,
        shutdown_rx,
    );
    info!(
        "🗓  Daily analytics report scheduled at {:02}:00 UTC",
        config.analytics.report_hour_utc
    );

    let state = Arc::new(AppState {
        recorder,
        geoip,
        analytics: config.analytics.clone(),
        payload: config.payload.clone(),
    });
    let router = api::create_api_router(state);

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server listening on http://{}", addr);
    info!("   - Payload available at http://{}/data.json", addr);
    info!("   - Summaries available at http://{}/api/summary", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    report_task.await?;

    Ok(())
}
