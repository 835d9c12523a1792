// queue-store: the backing-store contract and its Redis binding.
//
// spec.md deliberately leaves the durable store abstract, requiring only
// atomic counters, hash records, persistent streams with consumer groups,
// pub/sub, and secondary-index aggregation. `StoreAdapter` is that
// contract; `RedisStore` is the one production implementation, and `fake`
// (behind the `test-util` feature) backs unit tests that shouldn't need a
// live Redis.

mod error;
pub mod redis_store;

#[cfg(feature = "test-util")]
pub mod fake;

pub use error::{Result, StoreError};

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One entry read off a service's stream: the stream-assigned id (needed
/// to `XACK`) and the ticket id it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub entry_id: String,
    pub ticket_id: u64,
}

/// A message delivered on the `channel:queue_update:*` pattern: the exact
/// channel it arrived on, and its raw JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

pub type PubSubStream = BoxStream<'static, PubSubMessage>;

/// One write batched into a `pipeline` call. Each variant mirrors the
/// semantics of a single-operation method on this trait, but a pipeline
/// doesn't surface per-op return values — a caller whose next op depends
/// on a prior result (e.g. `record_dispatch`'s read of the last-activity
/// timestamp) makes that read before assembling the batch.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    HsetAll { key: String, fields: Vec<(String, String)> },
    XaddMaxlen { stream_key: String, maxlen: usize, ticket_id: u64 },
    HincrBy { key: String, field: String, delta: i64 },
    SetInt { key: String, value: i64 },
}

/// Cardinality probe target for the analytics reader's live-count and
/// `ahead_count` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatusTag {
    Waiting,
    Serving,
    Done,
    Cancelled,
}

impl TicketStatusTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Serving => "serving",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The primitives every component above this crate is written against.
/// Nothing outside `queue-store` imports the `redis` crate directly.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    // -- counters & hashes --------------------------------------------

    /// Atomically increments `key` and returns the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Reads an integer key, or `0` if absent (used for `current_number`).
    async fn get_int(&self, key: &str) -> Result<i64>;

    /// Unconditionally sets an integer key.
    async fn set_int(&self, key: &str, value: i64) -> Result<()>;

    /// Writes every `(field, value)` pair onto a hash in a single round
    /// trip.
    async fn hset_all(&self, key: &str, fields: &[(&str, &str)]) -> Result<()>;

    /// Reads a single hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Reads the whole hash, or `None` if the key doesn't exist.
    async fn hget_all(&self, key: &str) -> Result<Option<std::collections::HashMap<String, String>>>;

    /// Increments a hash field by an integer delta, creating it at `0`
    /// first if absent. Used by the statistics recorder.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    // -- streams & consumer groups --------------------------------------

    /// Appends `ticket_id` to `stream_key`, trimming to approximately
    /// `maxlen` entries.
    async fn xadd_maxlen(&self, stream_key: &str, maxlen: usize, ticket_id: u64) -> Result<()>;

    /// Creates `group` on `stream_key` starting at id `0`, creating the
    /// stream itself if it doesn't exist yet. A no-op if the group
    /// already exists.
    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<()>;

    /// Reads and immediately acknowledges at most one new entry for
    /// `consumer` within `group`. `None` when the stream has nothing new.
    async fn xreadgroup_one(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamEntry>>;

    // -- pub/sub ---------------------------------------------------------

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Opens a dedicated connection subscribed to `pattern`. Each call
    /// gets its own socket, matching the "pub/sub subscribers own their
    /// own connection" resource policy.
    async fn subscribe_pattern(&self, pattern: &str) -> Result<PubSubStream>;

    // -- dedup lease ------------------------------------------------------

    /// Writes `key` with `value` and a TTL only if it doesn't already
    /// exist. Returns `true` if this call won the write.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: usize) -> Result<bool>;

    // -- secondary index --------------------------------------------------

    /// (Re-)creates the secondary index over ticket hashes. Idempotent.
    async fn ensure_index(&self) -> Result<()>;

    /// Cardinality of tickets in `service` (or all services, if `None`)
    /// with the given status tag.
    async fn count_by_status(&self, service: Option<&str>, status: TicketStatusTag) -> Result<u64>;

    /// Ids of every ticket in `service` with the given status tag. Used
    /// by the dispatch engine's auto-complete sweep, which needs the ids
    /// themselves rather than just their count.
    async fn find_ids_by_status(&self, service: &str, status: TicketStatusTag) -> Result<Vec<u64>>;

    /// Cardinality of waiting tickets in `service` with `created_at`
    /// strictly less than `created_at_upper_bound` (unix seconds, already
    /// offset by the ε the repository applies so a ticket never counts
    /// itself).
    async fn count_waiting_before(&self, service: &str, created_at_upper_bound: f64) -> Result<u64>;

    /// `GROUP BY` aggregation over every ticket's derived hour-of-day,
    /// sorted ascending by hour. Empty buckets are omitted.
    async fn hourly_demand(&self, tz_offset_seconds: i64) -> Result<Vec<(u8, u64)>>;

    /// Every key matching `stats:{date}:*`.
    async fn scan_stats_keys(&self, date: &str) -> Result<Vec<String>>;

    // -- batched writes ---------------------------------------------------

    /// Executes every op in one round trip, preserving order. Used
    /// wherever spec.md calls for a set of independent writes to be
    /// pipelined rather than issued as separate round trips (ticket
    /// creation, dispatch statistics).
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()>;
}
