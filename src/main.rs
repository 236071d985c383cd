use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bingeboard_api::{
    api::{create_router, AppState},
    config::{BackendKind, Config},
    db::{MemoryBackend, PostgrestBackend, ShowBackend},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bingeboard_api=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let backend: Arc<dyn ShowBackend> = match config.bingeboard_backend {
        BackendKind::Postgrest => Arc::new(PostgrestBackend::new(
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
        )),
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory backend, data is not persisted");
            Arc::new(MemoryBackend::new())
        }
    };
    tracing::info!(backend = backend.name(), page_size = config.page_size, "Backend ready");

    let state = AppState::from_config(&config, backend);
    tracing::info!(
        max_feed_sessions = config.max_feed_sessions,
        image_cdn_host = %config.image_cdn_host,
        image_max_connections = config.image_max_connections,
        "Feed sessions and image preloader ready"
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
