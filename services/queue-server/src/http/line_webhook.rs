//! `POST /line/webhook`: signature verification plus the three chat
//! intents (issue/query/cancel) recovered from `handle_line_message` in
//! the original's `app.py`. Reply copy is English, not transliterated
//! (see SPEC_FULL.md §9.3) — the behavior carries over, not the copy.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use hmac::{Hmac, Mac};
use queue_core::ChatPush as _;
use serde::Deserialize;
use sha2::Sha256;

use crate::state::{AppState, DEFAULT_SERVICE};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookBody {
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "replyToken")]
    reply_token: Option<String>,
    source: Option<WebhookSource>,
    message: Option<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let (Some(secret), Some(access_token)) = (
        state.engine.config.line_channel_secret.as_deref(),
        state.engine.config.line_channel_access_token.as_deref(),
    ) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    let signature = headers
        .get("X-Line-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(secret, &body, signature) {
        return StatusCode::BAD_REQUEST;
    }

    let Ok(parsed) = serde_json::from_slice::<WebhookBody>(&body) else {
        return StatusCode::OK;
    };

    for event in parsed.events {
        // `replyToken` is accepted but unused: `ChatPush` only models
        // LINE's push endpoint (see queue-core), so a reply is sent as
        // a push addressed to the user directly, not a `replyMessage`
        // call bound to this single-use token.
        let (Some(_reply_token), Some(user_id), Some(message)) = (
            event.reply_token,
            event.source.and_then(|s| s.user_id),
            event.message,
        ) else {
            continue;
        };
        if message.kind != "text" {
            continue;
        }
        let text = message.text.unwrap_or_default();
        match handle_intent(&state, &user_id, text.trim()).await {
            Ok(Some(reply)) => {
                let chat = queue_core::LineChatPush::new(access_token.to_owned());
                let _ = chat.push(&user_id, &reply).await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, user_id, "failed to process chat intent");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }

    StatusCode::OK
}

fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected_signature) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected_signature).is_ok()
}

async fn handle_intent(state: &AppState, user_id: &str, text: &str) -> Result<Option<String>, queue_core::CoreError> {
    match text {
        "issue" | "get a ticket" | "take a number" => Ok(Some(handle_issue(state, user_id).await)),
        "status" | "check" | "query" => Ok(Some(handle_query(state, user_id).await)),
        "cancel" => Ok(Some(handle_cancel(state, user_id).await?)),
        _ => Ok(None),
    }
}

async fn handle_issue(state: &AppState, user_id: &str) -> String {
    if let Some(bound) = find_line_binding(state, user_id).await {
        if let Ok(Some(view)) = state.engine.ticket_repo.get(bound).await {
            if view.ticket.status.as_str() == "waiting" || (view.ticket.status.as_str() == "serving" && !view.is_passed()) {
                return format!(
                    "You're already in line.\nYour number: {}\nPeople ahead of you: {}",
                    view.ticket.id, view.ahead_count
                );
            }
        }
        clear_line_binding(state, user_id).await;
    }

    match state.engine.ticket_repo.create(DEFAULT_SERVICE, Some(user_id)).await {
        Ok(ticket) => {
            let view_url = format!(
                "{}/ticket/{}/view?token={}",
                state.engine.config.base_url, ticket.id, ticket.token
            );
            format!("Ticket issued!\nYour number: {}\n\nCheck your progress online:\n{view_url}", ticket.id)
        }
        Err(_) => "Sorry, we couldn't issue a ticket right now. Please try again.".to_owned(),
    }
}

async fn handle_query(state: &AppState, user_id: &str) -> String {
    let Some(bound) = find_line_binding(state, user_id).await else {
        let current_number = state
            .engine
            .store
            .get_int(&format!("current_number:{DEFAULT_SERVICE}"))
            .await
            .unwrap_or(0);
        let current_display = if current_number > 0 { current_number.to_string() } else { "not started yet".to_owned() };
        return format!(
            "You haven't taken a number yet.\nCurrently serving: {current_display}\nSend \"issue\" to join the queue."
        );
    };

    let Ok(Some(view)) = state.engine.ticket_repo.get(bound).await else {
        clear_line_binding(state, user_id).await;
        return "Your ticket could not be found. Please take a new number.".to_owned();
    };

    let current_number = view.current_number.unwrap_or(0);
    match view.ticket.status.as_str() {
        "waiting" => format!(
            "Queue status:\n- Now serving: {current_number}\n- Your number: {}\n- People ahead of you: {}",
            view.ticket.id, view.ahead_count
        ),
        "serving" if !view.is_passed() => format!(
            "You're being served now.\nYour number: {}\nPlease head to counter: {}",
            view.ticket.id,
            view.ticket.counter.as_deref().unwrap_or("")
        ),
        _ => {
            clear_line_binding(state, user_id).await;
            format!(
                "Service finished or your number was passed.\nYour number: {}\nCurrently serving: {current_number}.\nSend \"issue\" to take a new number.",
                view.ticket.id
            )
        }
    }
}

async fn handle_cancel(state: &AppState, user_id: &str) -> Result<String, queue_core::CoreError> {
    match find_line_binding(state, user_id).await {
        Some(ticket_id) => {
            state.engine.ticket_repo.cancel(ticket_id).await?;
            clear_line_binding(state, user_id).await;
            Ok("Your place in line has been cancelled.".to_owned())
        }
        None => Ok("You aren't in line.".to_owned()),
    }
}

async fn find_line_binding(state: &AppState, user_id: &str) -> Option<u64> {
    state
        .engine
        .store
        .hget(&format!("line_user:{user_id}"), "ticket_id")
        .await
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
}

async fn clear_line_binding(state: &AppState, user_id: &str) {
    let _ = state
        .engine
        .store
        .hset_all(&format!("line_user:{user_id}"), &[("ticket_id", ""), ("service", "")])
        .await;
}
