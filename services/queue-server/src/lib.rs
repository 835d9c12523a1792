pub mod auth;
pub mod http;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

/// Wires every route in spec.md §6's table plus the admin and chat
/// endpoints §9.1–§9.3 add, mirroring the teacher's flat `build_router`
/// shape.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/events/:service", get(http::events::live_updates))
        .route("/counter/:service/next", post(http::counter::call_next))
        .route("/ticket/:ticket_id/status", get(http::ticket::status))
        .route("/ticket/:ticket_id/view", get(http::ticket::view))
        .route("/session/status", get(http::session::status))
        .route("/session/ticket", post(http::session::create_ticket))
        .route("/session/cancel", post(http::session::cancel))
        .route("/session/clear", post(http::session::clear))
        .route("/admin/login", post(http::admin::login))
        .route("/admin/logout", post(http::admin::logout))
        .route("/admin/api/summary", get(http::admin::summary))
        .route("/admin/api/demand", get(http::admin::demand))
        .route("/line/webhook", post(http::line_webhook::webhook))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}
