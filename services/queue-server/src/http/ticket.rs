//! `/ticket/{id}/status` (unauthenticated) and `/ticket/{id}/view`
//! (dual-capability: session ticket id match, or `token=` query match).
//! Grounded in `api_ticket_status`/`ticket_view` in the original's
//! `app.py`; the view endpoint here returns the same `TicketView` JSON
//! as `/status` once authorized, carrying `is_passed`/`is_expired` so
//! the caller renders expiry without another round trip.

use axum::extract::{Path, Query, State};
use axum::Json;
use queue_protocol::TicketView;
use serde::Deserialize;
use tower_cookies::Cookies;

use crate::auth;
use crate::http::response::{forbidden, internal_error, not_found, HttpResult};
use crate::state::AppState;

pub async fn status(State(state): State<AppState>, Path(ticket_id): Path<u64>) -> HttpResult<Json<TicketView>> {
    let view = state
        .engine
        .ticket_repo
        .get(ticket_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("ticket {ticket_id} not found")))?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct ViewQuery {
    token: Option<String>,
}

pub async fn view(
    State(state): State<AppState>,
    Path(ticket_id): Path<u64>,
    Query(query): Query<ViewQuery>,
    cookies: Cookies,
) -> HttpResult<Json<TicketView>> {
    let view = state
        .engine
        .ticket_repo
        .get(ticket_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("ticket {ticket_id} not found")))?;

    let session = auth::read_session(&cookies, &state.cookie_key);
    let session_authorizes = session.ticket_id == Some(ticket_id);
    let token_authorizes = query
        .token
        .as_deref()
        .is_some_and(|token| !token.is_empty() && token == view.ticket.token);

    if !session_authorizes && !token_authorizes {
        return Err(forbidden("you are not authorized to view this ticket"));
    }

    Ok(Json(view))
}
