//! End-to-end coverage of the session issue/view/cancel path (spec.md
//! S1/S2) against a real Redis Stack instance, grounded in the
//! teacher's `tests/http_races.rs` (spawn the router on an ephemeral
//! port, drive it with `reqwest`).
//!
//! Uses `redis/redis-stack-server` rather than a plain Redis image:
//! `RedisStore::connect` creates a RediSearch index on startup, which
//! a bare `redis:*` image doesn't provide.

use std::net::SocketAddr;
use std::sync::Arc;

use queue_core::{Config, NoOpChatPush, QueueEngine};
use queue_server::state::AppState;
use queue_store::redis_store::RedisStore;
use queue_store::StoreAdapter;
use serde_json::Value;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tower_cookies::Key;

async fn redis_stack() -> ContainerAsync<GenericImage> {
    GenericImage::new("redis/redis-stack-server", "latest")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .with_exposed_port(6379.tcp())
        .start()
        .await
        .expect("failed to start redis-stack-server container")
}

async fn make_server(redis_url: String) -> (SocketAddr, reqwest::Client) {
    let config = Config {
        redis_url,
        bind_addr: "127.0.0.1:0".to_owned(),
        base_url: "http://localhost:8080".to_owned(),
        line_channel_secret: None,
        line_channel_access_token: None,
        admin_username: "admin".to_owned(),
        admin_password: "test-password".to_owned(),
        session_signing_key: "a".repeat(64),
        queue_tz_offset_seconds: 0,
        redis_pool_size: 10,
        redis_socket_timeout_ms: 5_000,
        log_level: "info".to_owned(),
    };

    let store: Arc<dyn StoreAdapter> = Arc::new(
        RedisStore::connect(
            &config.redis_url,
            std::time::Duration::from_millis(config.redis_socket_timeout_ms),
            config.redis_pool_size,
        )
        .await
        .expect("failed to connect to test redis"),
    );
    let engine = QueueEngine::new(store, Arc::new(NoOpChatPush), config);
    engine.ensure_bus_subscribed().await;

    let cookie_key = Key::generate();
    let state = AppState::new(engine, cookie_key);
    let router = queue_server::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
    (addr, client)
}

#[tokio::test]
async fn issuing_a_ticket_then_checking_status_reflects_ahead_count() {
    let container = redis_stack().await;
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let (addr, client) = make_server(format!("redis://127.0.0.1:{port}")).await;

    let first: Value = client
        .post(format!("http://{addr}/session/ticket"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first_id = first["ticket_id"].as_u64().unwrap();

    let status: Value = client
        .get(format!("http://{addr}/ticket/{first_id}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["ahead_count"].as_u64(), Some(0));
    assert_eq!(status["status"].as_str(), Some("waiting"));
}

#[tokio::test]
async fn a_second_session_ticket_is_rejected_while_one_is_already_held() {
    let container = redis_stack().await;
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let (addr, client) = make_server(format!("redis://127.0.0.1:{port}")).await;

    let response = client.post(format!("http://{addr}/session/ticket")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let second = client.post(format!("http://{addr}/session/ticket")).send().await.unwrap();
    assert_eq!(second.status(), 400);
}

#[tokio::test]
async fn cancelling_a_queued_ticket_lets_call_next_skip_it() {
    let container = redis_stack().await;
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let (addr, client) = make_server(format!("redis://127.0.0.1:{port}")).await;

    let first: Value = client
        .post(format!("http://{addr}/session/ticket"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first_id = first["ticket_id"].as_u64().unwrap();

    client.post(format!("http://{addr}/session/cancel")).send().await.unwrap();

    // A fresh session for the second ticket: the cookie jar already
    // cleared `qc_session` on cancel, so this ticket binds a new one.
    let second: Value = client
        .post(format!("http://{addr}/session/ticket"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second_id = second["ticket_id"].as_u64().unwrap();
    assert!(second_id > first_id);

    let dispatched: Value = client
        .post(format!("http://{addr}/counter/register/next"))
        .json(&serde_json::json!({ "counter": "c1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dispatched["id"].as_u64(), Some(second_id));
}
