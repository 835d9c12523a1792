//! Typed configuration loaded from the process environment, mirroring the
//! teacher's `DATABASE_URL`/`BIND_ADDR`/`LOG_LEVEL` handling in `main.rs`:
//! required values use `.expect()` with a descriptive message, optional
//! ones fall back to a documented default.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub bind_addr: String,
    pub base_url: String,
    pub line_channel_secret: Option<String>,
    pub line_channel_access_token: Option<String>,
    pub admin_username: String,
    pub admin_password: String,
    pub session_signing_key: String,
    pub queue_tz_offset_seconds: i64,
    pub redis_pool_size: u32,
    pub redis_socket_timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Reads every recognized variable from the environment. Panics with
    /// a descriptive message if `REDIS_URL` or `SESSION_SIGNING_KEY` is
    /// missing — there is no sane default for either.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            base_url: env_or("BASE_URL", "http://localhost:8080"),
            line_channel_secret: env::var("LINE_CHANNEL_SECRET").ok(),
            line_channel_access_token: env::var("LINE_CHANNEL_ACCESS_TOKEN").ok(),
            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password: env::var("ADMIN_PASSWORD")
                .expect("ADMIN_PASSWORD must be set"),
            session_signing_key: env::var("SESSION_SIGNING_KEY")
                .expect("SESSION_SIGNING_KEY must be set"),
            queue_tz_offset_seconds: env_parsed_or("QUEUE_TZ_OFFSET_SECONDS", 28_800),
            redis_pool_size: env_parsed_or("REDIS_POOL_SIZE", 10),
            redis_socket_timeout_ms: env_parsed_or("REDIS_SOCKET_TIMEOUT_MS", 5_000),
            log_level: env_or("LOG_LEVEL", "info"),
        }
    }

    /// Whether a LINE chat channel is configured. When it isn't, the
    /// push dispatcher falls back to a no-op implementation.
    #[must_use]
    pub fn has_chat_channel(&self) -> bool {
        self.line_channel_secret.is_some() && self.line_channel_access_token.is_some()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
