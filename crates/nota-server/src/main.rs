mod auth;
mod broadcast;
mod config;
mod error;
mod routes;
mod store;

use std::sync::Arc;

use broadcast::{ChangeChannel, InProcessChannel, RedisChannel};
use config::AppConfig;
use routes::{app_router, AppState};
use store::LibSqlNoteStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nota_server=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting nota-server with config: {:?}", config);

    let store = Arc::new(LibSqlNoteStore::open(&config.database_path).await?);

    let channel: Arc<dyn ChangeChannel> = match &config.redis_url {
        Some(url) => {
            let channel = RedisChannel::connect(url).await?;
            tracing::info!("Change fan-out via Redis pub/sub");
            Arc::new(channel)
        }
        None => {
            tracing::warn!(
                "Change fan-out is in-process only; run a single instance or set NOTA_REDIS_URL"
            );
            Arc::new(InProcessChannel::new())
        }
    };

    let state = AppState::new(config.clone(), store, channel);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("nota-server listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
