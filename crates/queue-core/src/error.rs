use thiserror::Error;

use queue_store::StoreError;

/// Errors a `queue-core` operation can surface to its caller. Most
/// backend-detail handling lives inside the dispatch/analytics modules
/// themselves (per spec.md §7's "skip, don't fail" and "swallow to zero"
/// policies) — this enum is for what's left over once that's done.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("ticket {0} not found")]
    NotFound(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
