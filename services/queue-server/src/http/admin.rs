//! `/admin/*`: login/logout against the single configured operator
//! account (spec.md §9.2), plus the two read-only dashboard aggregates.
//! Grounded in `admin_login`/`api_admin_summary`/`api_admin_demand` in
//! the original's `app.py`.

use axum::extract::State;
use axum::Json;
use queue_protocol::{HourlyDemandRow, OverallSummary};
use serde::Deserialize;
use serde_json::json;
use tower_cookies::Cookies;

use crate::auth;
use crate::http::response::{unauthorized, HttpResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<LoginRequest>,
) -> HttpResult<Json<serde_json::Value>> {
    let config = &state.engine.config;
    let matches = auth::constant_time_eq(&body.username, &config.admin_username)
        && auth::constant_time_eq(&body.password, &config.admin_password);
    if !matches {
        return Err(unauthorized("invalid username or password"));
    }
    auth::set_admin(&cookies, &state.cookie_key);
    Ok(Json(json!({ "message": "logged in" })))
}

pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Json<serde_json::Value> {
    auth::clear_admin(&cookies, &state.cookie_key);
    Json(json!({ "message": "logged out" }))
}

pub async fn summary(
    State(state): State<AppState>,
    cookies: Cookies,
) -> HttpResult<Json<OverallSummary>> {
    require_admin(&state, &cookies)?;
    let today = today_date_bucket(state.engine.config.queue_tz_offset_seconds);
    Ok(Json(state.engine.analytics.overall_summary(&today).await))
}

pub async fn demand(
    State(state): State<AppState>,
    cookies: Cookies,
) -> HttpResult<Json<Vec<HourlyDemandRow>>> {
    require_admin(&state, &cookies)?;
    let tz_offset = state.engine.config.queue_tz_offset_seconds;
    Ok(Json(state.engine.analytics.hourly_demand(tz_offset).await))
}

fn require_admin(state: &AppState, cookies: &Cookies) -> HttpResult<()> {
    if auth::is_admin(cookies, &state.cookie_key) {
        Ok(())
    } else {
        Err(unauthorized("admin session required"))
    }
}

fn today_date_bucket(tz_offset_seconds: i64) -> String {
    use chrono::{TimeZone, Utc};
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64;
    Utc.timestamp_opt(now + tz_offset_seconds, 0)
        .single()
        .expect("valid unix timestamp")
        .format("%Y%m%d")
        .to_string()
}
