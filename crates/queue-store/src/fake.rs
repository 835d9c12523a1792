//! An in-memory `StoreAdapter` good enough to drive `queue-core`'s unit
//! tests without a live Redis. Single-process, single-connection — no
//! attempt is made to model Redis's own concurrency semantics beyond what
//! a `tokio::sync::Mutex`-guarded `HashMap` gives for free.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{PipelineOp, PubSubMessage, PubSubStream, Result, StoreAdapter, TicketStatusTag};

#[derive(Default)]
struct State {
    ints: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    streams: HashMap<String, VecDeque<(String, u64)>>,
    groups: HashMap<(String, String), ()>,
    next_entry_id: u64,
}

pub struct FakeStore {
    state: Mutex<State>,
    pubsub: broadcast::Sender<PubSubMessage>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Self {
        let (pubsub, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(State::default()),
            pubsub,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake store mutex poisoned")
    }

    fn glob_matches(pattern: &str, channel: &str) -> bool {
        let Some(prefix) = pattern.strip_suffix('*') else {
            return pattern == channel;
        };
        channel.starts_with(prefix)
    }
}

#[async_trait]
impl StoreAdapter for FakeStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut state = self.lock();
        let value = state.ints.entry(key.to_owned()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_int(&self, key: &str) -> Result<i64> {
        Ok(*self.lock().ints.get(key).unwrap_or(&0))
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.lock().ints.insert(key.to_owned(), value);
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut state = self.lock();
        let hash = state.hashes.entry(key.to_owned()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hget_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        Ok(self.lock().hashes.get(key).cloned())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut state = self.lock();
        let hash = state.hashes.entry(key.to_owned()).or_default();
        let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_owned(), next.to_string());
        Ok(next)
    }

    async fn xadd_maxlen(&self, stream_key: &str, maxlen: usize, ticket_id: u64) -> Result<()> {
        let mut state = self.lock();
        let next_id = state.next_entry_id;
        state.next_entry_id += 1;
        let entry_id = format!("{next_id}-0");
        let stream = state.streams.entry(stream_key.to_owned()).or_default();
        stream.push_back((entry_id, ticket_id));
        while stream.len() > maxlen {
            stream.pop_front();
        }
        Ok(())
    }

    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<()> {
        self.lock()
            .groups
            .insert((stream_key.to_owned(), group.to_owned()), ());
        Ok(())
    }

    async fn xreadgroup_one(
        &self,
        stream_key: &str,
        _group: &str,
        _consumer: &str,
    ) -> Result<Option<crate::StreamEntry>> {
        let mut state = self.lock();
        let Some(stream) = state.streams.get_mut(stream_key) else {
            return Ok(None);
        };
        Ok(stream
            .pop_front()
            .map(|(entry_id, ticket_id)| crate::StreamEntry { entry_id, ticket_id }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let _ = self.pubsub.send(PubSubMessage {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        });
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<PubSubStream> {
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as _;

        let pattern = pattern.to_owned();
        let stream = BroadcastStream::new(self.pubsub.subscribe())
            .filter_map(move |msg| {
                let msg = msg.ok()?;
                Self::glob_matches(&pattern, &msg.channel).then_some(msg)
            });
        Ok(Box::pin(stream))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, _ttl_seconds: usize) -> Result<bool> {
        let mut state = self.lock();
        let hash = state.hashes.entry("__dedup__".to_owned()).or_default();
        if hash.contains_key(key) {
            return Ok(false);
        }
        hash.insert(key.to_owned(), value.to_owned());
        Ok(true)
    }

    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn count_by_status(&self, service: Option<&str>, status: TicketStatusTag) -> Result<u64> {
        let state = self.lock();
        let count = state
            .hashes
            .iter()
            .filter(|(key, _)| key.starts_with("ticket:"))
            .filter(|(_, hash)| {
                let matches_service = service
                    .map(|s| hash.get("service").map(String::as_str) == Some(s))
                    .unwrap_or(true);
                let matches_status = hash.get("status").map(String::as_str) == Some(status.as_str());
                matches_service && matches_status
            })
            .count();
        Ok(count as u64)
    }

    async fn find_ids_by_status(&self, service: &str, status: TicketStatusTag) -> Result<Vec<u64>> {
        let state = self.lock();
        let mut ids: Vec<u64> = state
            .hashes
            .iter()
            .filter_map(|(key, hash)| {
                let id: u64 = key.strip_prefix("ticket:")?.parse().ok()?;
                let matches = hash.get("service").map(String::as_str) == Some(service)
                    && hash.get("status").map(String::as_str) == Some(status.as_str());
                matches.then_some(id)
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn count_waiting_before(&self, service: &str, created_at_upper_bound: f64) -> Result<u64> {
        let state = self.lock();
        let count = state
            .hashes
            .iter()
            .filter(|(key, _)| key.starts_with("ticket:"))
            .filter(|(_, hash)| {
                hash.get("service").map(String::as_str) == Some(service)
                    && hash.get("status").map(String::as_str) == Some("waiting")
                    && hash
                        .get("created_at")
                        .and_then(|v| v.parse::<f64>().ok())
                        .is_some_and(|created_at| created_at < created_at_upper_bound)
            })
            .count();
        Ok(count as u64)
    }

    async fn hourly_demand(&self, tz_offset_seconds: i64) -> Result<Vec<(u8, u64)>> {
        let state = self.lock();
        let mut buckets: HashMap<u8, u64> = HashMap::new();
        for hash in state.hashes.values().filter(|h| h.contains_key("created_at")) {
            let Some(created_at) = hash.get("created_at").and_then(|v| v.parse::<i64>().ok()) else {
                continue;
            };
            let hour = (((created_at + tz_offset_seconds) / 3600).rem_euclid(24)) as u8;
            *buckets.entry(hour).or_insert(0) += 1;
        }
        let mut rows: Vec<(u8, u64)> = buckets.into_iter().collect();
        rows.sort_by_key(|(hour, _)| *hour);
        Ok(rows)
    }

    async fn scan_stats_keys(&self, date: &str) -> Result<Vec<String>> {
        let prefix = format!("stats:{date}:");
        Ok(self
            .lock()
            .hashes
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }

    /// No atomicity to model here: a single-threaded in-memory store has
    /// no interleaving for a pipeline to protect against, so this just
    /// runs each op in order against the existing methods.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        for op in ops {
            match op {
                PipelineOp::HsetAll { key, fields } => {
                    let pairs: Vec<(&str, &str)> =
                        fields.iter().map(|(field, value)| (field.as_str(), value.as_str())).collect();
                    self.hset_all(&key, &pairs).await?;
                }
                PipelineOp::XaddMaxlen { stream_key, maxlen, ticket_id } => {
                    self.xadd_maxlen(&stream_key, maxlen, ticket_id).await?;
                }
                PipelineOp::HincrBy { key, field, delta } => {
                    self.hincr_by(&key, &field, delta).await?;
                }
                PipelineOp::SetInt { key, value } => {
                    self.set_int(&key, value).await?;
                }
            }
        }
        Ok(())
    }
}
