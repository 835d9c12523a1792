//! `/session/*`: binds the caller's signed cookie to at most one ticket
//! at a time. Grounded in `session_create_ticket`/`session_cancel`/
//! `session_clear`/`session_status` in the original's `app.py`.

use axum::extract::State;
use axum::Json;
use queue_protocol::{CreateTicketResponse, SessionStatus};
use serde_json::json;
use tower_cookies::Cookies;

use crate::auth::{self, SessionState};
use crate::http::response::{bad_request, internal_error, HttpResult};
use crate::state::{AppState, DEFAULT_SERVICE};

pub async fn status(State(state): State<AppState>, cookies: Cookies) -> Json<SessionStatus> {
    let session = auth::read_session(&cookies, &state.cookie_key);
    Json(SessionStatus {
        has_ticket: session.ticket_id.is_some(),
        ticket_id: session.ticket_id,
        service: session.service,
    })
}

pub async fn create_ticket(
    State(state): State<AppState>,
    cookies: Cookies,
) -> HttpResult<Json<CreateTicketResponse>> {
    let session = auth::read_session(&cookies, &state.cookie_key);
    if session.ticket_id.is_some() {
        return Err(bad_request("already_has_ticket"));
    }

    let ticket = state
        .engine
        .ticket_repo
        .create(DEFAULT_SERVICE, None)
        .await
        .map_err(internal_error)?;

    auth::write_session(
        &cookies,
        &state.cookie_key,
        &SessionState {
            ticket_id: Some(ticket.id),
            service: Some(ticket.service.clone()),
        },
    );

    Ok(Json(CreateTicketResponse {
        ticket_id: ticket.id,
        number: ticket.id,
        service: ticket.service,
        created_at: ticket.created_at,
        token: ticket.token,
    }))
}

pub async fn cancel(State(state): State<AppState>, cookies: Cookies) -> HttpResult<Json<serde_json::Value>> {
    let session = auth::read_session(&cookies, &state.cookie_key);
    if let Some(ticket_id) = session.ticket_id {
        state.engine.ticket_repo.cancel(ticket_id).await.map_err(internal_error)?;
        auth::clear_session(&cookies, &state.cookie_key);
    }
    Ok(Json(json!({ "message": "cancelled" })))
}

pub async fn clear(State(state): State<AppState>, cookies: Cookies) -> Json<serde_json::Value> {
    auth::clear_session(&cookies, &state.cookie_key);
    Json(json!({ "message": "cleared" }))
}
