use std::sync::Arc;

use media_studio::config::AppConfig;
use media_studio::google_auth::{AccessTokenProvider, GoogleAuth};
use media_studio::history::{HistoryStore, MemoryHistoryStore, PostgresHistoryStore};
use media_studio::media::{MediaApi, VertexMediaClient};
use media_studio::orchestrator::Orchestrator;
use media_studio::storage::{ArtifactStore, GcsArtifactStore};
use media_studio::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("❌ Invalid configuration: {}", e);
        e
    })?;

    tracing::info!(
        "Configuration - Project: {}, Location: {}, Storage: gs://{}/{}",
        config.project_id,
        config.location,
        config.storage.bucket,
        config.storage.prefix
    );

    let (history, store_backend): (Arc<dyn HistoryStore>, &'static str) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            tracing::info!("✅ History store: Postgres");
            (Arc::new(PostgresHistoryStore::new(pool, config.store_retry)), "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set. History is kept in memory and lost on restart.");
            (Arc::new(MemoryHistoryStore::new()), "memory")
        }
    };

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let auth: Arc<dyn AccessTokenProvider> =
        Arc::new(GoogleAuth::new(http.clone(), config.static_access_token.clone()));
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(GcsArtifactStore::new(
        http.clone(),
        auth.clone(),
        config.storage.clone(),
        config.media_retry,
    ));
    let media: Arc<dyn MediaApi> = Arc::new(VertexMediaClient::new(
        http,
        auth,
        artifacts.clone(),
        config.project_id.clone(),
        config.location.clone(),
        config.media_retry,
    ));

    let shared_state = Arc::new(AppState {
        orchestrator: Orchestrator::new(media, history.clone(), artifacts, config.poll),
        history,
        default_user_id: config.default_user_id.clone(),
        store_backend,
    });

    let app = build_router(shared_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Server listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug,media_studio=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
            } else {
                "info,media_studio=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
            }
        });

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON lines for Cloud Logging, readable output otherwise
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🎬 Media Studio starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}
