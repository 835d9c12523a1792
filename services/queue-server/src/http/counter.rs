//! `POST /counter/{service}/next` — a counter operator pulling the next
//! ticket. Grounded in `api_call_next` in the original's `app.py`: an
//! empty queue is 200 with an informational body, not an error.

use axum::extract::{Path, State};
use axum::Json;
use queue_protocol::CallNextRequest;
use serde_json::json;

use queue_core::DispatchOutcome;

use crate::http::response::{internal_error, HttpResult};
use crate::state::AppState;

pub async fn call_next(
    State(state): State<AppState>,
    Path(service): Path<String>,
    body: Option<Json<CallNextRequest>>,
) -> HttpResult<Json<serde_json::Value>> {
    let counter = body.map(|Json(body)| body.counter).unwrap_or_else(|| "counter-1".to_owned());

    let outcome = state
        .engine
        .dispatch
        .call_next(&service, &counter)
        .await
        .map_err(internal_error)?;

    match outcome {
        DispatchOutcome::Dispatched(view) => Ok(Json(serde_json::to_value(view).expect("TicketView always serializes"))),
        DispatchOutcome::QueueEmpty => Ok(Json(json!({ "message": "no one in queue" }))),
    }
}
