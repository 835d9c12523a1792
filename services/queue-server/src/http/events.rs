//! `GET /events/{service}`: the live-view SSE stream (spec.md §4.7),
//! grounded in the teacher's `http/sse.rs` `dashboard_sse` — subscribe,
//! emit the synthetic initial frame, then relay events until the bus
//! evicts the listener or the client disconnects.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::state::AppState;

pub async fn live_updates(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.engine.ensure_bus_subscribed().await;

    let current_number = state
        .engine
        .store
        .get_int(&format!("current_number:{service}"))
        .await
        .unwrap_or(0);
    let initial = queue_protocol::QueueEvent::initial(&service, current_number.max(0) as u64);

    let subscription = state.engine.bus.subscribe(&service).await;
    let stream = ReceiverStream::new(subscription.receiver).map(|event| {
        let json = serde_json::to_string(&event).expect("QueueEvent always serializes");
        Ok(Event::default().data(json))
    });

    let initial_json = serde_json::to_string(&initial).expect("QueueEvent always serializes");
    let initial_frame = tokio_stream::once(Ok(Event::default().data(initial_json)));

    Sse::new(initial_frame.chain(stream)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
