use std::sync::Arc;

use queue_core::{Config, NoOpChatPush, QueueEngine, LineChatPush};
use queue_server::state::AppState;
use queue_store::redis_store::RedisStore;
use tower_cookies::Key;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!("connecting to backing store...");
    let store = RedisStore::connect(
        &config.redis_url,
        std::time::Duration::from_millis(config.redis_socket_timeout_ms),
        config.redis_pool_size,
    )
    .await
    .expect("failed to connect to backing store");
    let store: Arc<dyn queue_store::StoreAdapter> = Arc::new(store);
    info!("secondary index ready");

    let chat: Arc<dyn queue_core::ChatPush> = if config.has_chat_channel() {
        Arc::new(LineChatPush::new(
            config
                .line_channel_access_token
                .clone()
                .expect("has_chat_channel guarantees this is set"),
        ))
    } else {
        info!("no chat channel configured, push notifications are disabled");
        Arc::new(NoOpChatPush)
    };

    let cookie_key = Key::derive_from(config.session_signing_key.as_bytes());
    let bind_addr = config.bind_addr.clone();

    let engine = QueueEngine::new(store, chat, config);
    engine.ensure_bus_subscribed().await;

    let state = AppState::new(engine, cookie_key);
    let router = queue_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
