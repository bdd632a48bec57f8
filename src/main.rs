use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linkpulse::analytics::{GeoEnricher, GeoProvider};
use linkpulse::api;
use linkpulse::auth::AuthService;
use linkpulse::config::{Config, DatabaseBackend};
use linkpulse::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("linkpulse=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    // Geo enrichment runs off the request path
    let geo = GeoProvider::from_config(&config.geo)?;
    let enricher = Arc::new(GeoEnricher::spawn(
        Arc::clone(&storage),
        geo,
        &config.enrichment,
    ));

    let auth_service = Arc::new(AuthService::new(&config.auth, Arc::clone(&storage)));

    let router = api::create_api_router(
        Arc::clone(&storage),
        auth_service,
        Arc::clone(&enricher),
        config.client_ip.clone(),
        &config.cors,
    );

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 API server listening on http://{}", addr);
    info!("   - Click ingestion at http://{}/api/clicks", addr);
    info!("   - Dashboard analytics at http://{}/api/analytics/...", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down");
    })
    .await?;

    // Let queued enrichment jobs finish before exit
    enricher.shutdown().await;

    Ok(())
}
