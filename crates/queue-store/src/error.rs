use thiserror::Error;

/// Everything a `StoreAdapter` call can fail with. Callers match on kind
/// rather than inspecting strings — mirrors how the teacher's repo layer
/// surfaces `sqlx::Error` as a typed enum rather than `anyhow::Error`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// The secondary index is missing (`-ft.search: no such index`, or
    /// equivalent). The ticket repository reacts by recreating it and
    /// answering the current call with a degraded `ahead_count = 0`.
    #[error("secondary index missing")]
    IndexMissing,

    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
