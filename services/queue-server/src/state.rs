use std::sync::Arc;

use queue_core::QueueEngine;
use tower_cookies::Key;

/// The single default service web-issued tickets belong to, matching the
/// original's `create_ticket("register")` — spec.md's session endpoints
/// take no service parameter, so there is exactly one queue a bare
/// `/session/ticket` call can join.
pub const DEFAULT_SERVICE: &str = "register";

/// Everything a handler needs: the core engine and the key used to sign
/// session/admin cookies. Cheap to clone (both fields are `Arc`-backed),
/// matching the teacher's `AppState` clone-per-request pattern.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueueEngine>,
    pub cookie_key: Key,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Arc<QueueEngine>, cookie_key: Key) -> Self {
        Self { engine, cookie_key }
    }
}
