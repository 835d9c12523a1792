//! The one production `StoreAdapter`: Redis, reached through
//! `redis::aio::ConnectionManager` for pooled, auto-reconnecting access,
//! plus RediSearch for the secondary index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{PipelineOp, PubSubMessage, PubSubStream, Result, StoreAdapter, StoreError, StreamEntry, TicketStatusTag};

const INDEX_NAME: &str = "idx:ticket";
const CONSUMER_GROUP_START_ID: &str = "0";

pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    /// Bounds concurrent pub/sub subscriber connections. `ConnectionManager`
    /// multiplexes every non-pub/sub command over one socket already, so
    /// `redis_pool_size` has nothing to pool there; this is where it's
    /// actually spent, since `subscribe_pattern` opens a dedicated socket
    /// per call.
    pubsub_permits: Arc<Semaphore>,
}

impl RedisStore {
    /// Connects and ensures the secondary index exists. `redis_url` is a
    /// standard `redis://` connection string. `socket_timeout` bounds both
    /// connection establishment and command round trips on the shared
    /// multiplexed connection; `max_pubsub_connections` bounds how many
    /// dedicated `subscribe_pattern` sockets may be open at once.
    pub async fn connect(redis_url: &str, socket_timeout: Duration, max_pubsub_connections: u32) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(socket_timeout)
            .set_response_timeout(socket_timeout);
        let conn = ConnectionManager::new_with_config(client.clone(), manager_config).await?;
        let store = Self {
            client,
            conn,
            pubsub_permits: Arc::new(Semaphore::new(max_pubsub_connections.max(1) as usize)),
        };
        store.ensure_index().await?;
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// `true` if a RediSearch error indicates the index doesn't exist.
    fn is_missing_index_error(err: &RedisError) -> bool {
        let msg = err.to_string().to_lowercase();
        msg.contains("no such index") || msg.contains("unknown index name")
    }
}

#[async_trait]
impl StoreAdapter for RedisStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn get_int(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        let mut conn = self.conn();
        conn.set(key, value).await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn();
        let pairs: Vec<(&str, &str)> = fields.to_vec();
        let _: () = conn.hset_multiple(key, &pairs).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hget_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn();
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn xadd_maxlen(&self, stream_key: &str, maxlen: usize, ticket_id: u64) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("XADD")
            .arg(stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .arg("*")
            .arg("ticket_id")
            .arg(ticket_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ensure_consumer_group(&self, stream_key: &str, group: &str) -> Result<()> {
        let mut conn = self.conn();
        let result: std::result::Result<String, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg(CONSUMER_GROUP_START_ID)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn xreadgroup_one(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamEntry>> {
        let mut conn = self.conn();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(stream_key)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entry = parse_single_stream_entry(&reply);
        if let Some(entry) = &entry {
            let _: i64 = redis::cmd("XACK")
                .arg(stream_key)
                .arg(group)
                .arg(&entry.entry_id)
                .query_async(&mut conn)
                .await?;
        }
        Ok(entry)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<PubSubStream> {
        // Held for the stream's lifetime (threaded through `unfold`'s
        // state) so it's released exactly when the subscriber drops it.
        let permit = self
            .pubsub_permits
            .clone()
            .acquire_owned()
            .await
            .expect("pubsub semaphore is never closed");

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        let pattern_owned = pattern.to_owned();
        let inner = pubsub.into_on_message();
        let stream = futures_util::stream::unfold((inner, permit, pattern_owned), |(mut inner, permit, pattern_owned)| async move {
            loop {
                let msg = inner.next().await?;
                let channel = msg.get_channel_name().to_owned();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, pattern = %pattern_owned, "dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                return Some((PubSubMessage { channel, payload }, (inner, permit, pattern_owned)));
            }
        });
        Ok(Box::pin(stream))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: usize) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.conn();
        let result: std::result::Result<String, RedisError> = redis::cmd("FT.CREATE")
            .arg(INDEX_NAME)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg("ticket:")
            .arg("SCHEMA")
            .arg("service")
            .arg("TAG")
            .arg("status")
            .arg("TAG")
            .arg("created_at")
            .arg("NUMERIC")
            .arg("SORTABLE")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().to_lowercase().contains("already exists") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn count_by_status(&self, service: Option<&str>, status: TicketStatusTag) -> Result<u64> {
        let query = match service {
            Some(service) => format!("@service:{{{service}}} @status:{{{}}}", status.as_str()),
            None => format!("@status:{{{}}}", status.as_str()),
        };
        match self.ft_search_count(&query).await {
            Ok(count) => Ok(count),
            Err(StoreError::IndexMissing) => {
                warn!("secondary index missing, recreating and degrading this call to zero");
                self.ensure_index().await?;
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    async fn find_ids_by_status(&self, service: &str, status: TicketStatusTag) -> Result<Vec<u64>> {
        let mut conn = self.conn();
        let query = format!("@service:{{{service}}} @status:{{{}}}", status.as_str());
        let result: std::result::Result<Value, RedisError> = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(&query)
            .arg("NOCONTENT")
            .arg("LIMIT")
            .arg(0)
            .arg(1_000)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(value) => Ok(parse_search_doc_ids(&value)),
            Err(err) if Self::is_missing_index_error(&err) => {
                warn!("secondary index missing, recreating and degrading auto-complete sweep to empty");
                self.ensure_index().await?;
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn count_waiting_before(&self, service: &str, created_at_upper_bound: f64) -> Result<u64> {
        let query = format!(
            "@service:{{{service}}} @status:{{waiting}} @created_at:[-inf ({created_at_upper_bound}]"
        );
        match self.ft_search_count(&query).await {
            Ok(count) => Ok(count),
            Err(StoreError::IndexMissing) => {
                warn!("secondary index missing, recreating and degrading ahead_count to zero");
                self.ensure_index().await?;
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    async fn hourly_demand(&self, tz_offset_seconds: i64) -> Result<Vec<(u8, u64)>> {
        let mut conn = self.conn();
        let expr = format!("floor((@created_at+{tz_offset_seconds})/3600)%24");
        let result: std::result::Result<Value, RedisError> = redis::cmd("FT.AGGREGATE")
            .arg(INDEX_NAME)
            .arg("*")
            .arg("APPLY")
            .arg(expr)
            .arg("AS")
            .arg("hour")
            .arg("GROUPBY")
            .arg(1)
            .arg("@hour")
            .arg("REDUCE")
            .arg("COUNT")
            .arg(0)
            .arg("AS")
            .arg("bucket_count")
            .arg("SORTBY")
            .arg(2)
            .arg("@hour")
            .arg("ASC")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(value) => Ok(parse_hourly_aggregate(&value)),
            Err(err) if Self::is_missing_index_error(&err) => {
                warn!("secondary index missing, recreating and degrading hourly demand to empty");
                self.ensure_index().await?;
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn scan_stats_keys(&self, date: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("stats:{date}:*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        debug!(count = keys.len(), %pattern, "scanned stats keys");
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                PipelineOp::HsetAll { key, fields } => {
                    let pairs: Vec<(&str, &str)> =
                        fields.iter().map(|(field, value)| (field.as_str(), value.as_str())).collect();
                    pipe.hset_multiple(key, &pairs).ignore();
                }
                PipelineOp::XaddMaxlen { stream_key, maxlen, ticket_id } => {
                    pipe.cmd("XADD")
                        .arg(stream_key)
                        .arg("MAXLEN")
                        .arg("~")
                        .arg(*maxlen)
                        .arg("*")
                        .arg("ticket_id")
                        .arg(*ticket_id)
                        .ignore();
                }
                PipelineOp::HincrBy { key, field, delta } => {
                    pipe.hincr(key, field, *delta).ignore();
                }
                PipelineOp::SetInt { key, value } => {
                    pipe.set(key, *value).ignore();
                }
            }
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

impl RedisStore {
    async fn ft_search_count(&self, query: &str) -> Result<u64> {
        let mut conn = self.conn();
        let result: std::result::Result<Value, RedisError> = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(query)
            .arg("LIMIT")
            .arg(0)
            .arg(0)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(value) => Ok(parse_search_total(&value)),
            Err(err) if Self::is_missing_index_error(&err) => Err(StoreError::IndexMissing),
            Err(err) => Err(err.into()),
        }
    }
}

/// `FT.SEARCH ... LIMIT 0 0` replies with a one-element array: the total
/// match count.
fn parse_search_total(value: &Value) -> u64 {
    if let Value::Array(items) = value {
        if let Some(Value::Int(total)) = items.first() {
            return (*total).max(0) as u64;
        }
    }
    0
}

/// `FT.SEARCH ... NOCONTENT` replies `[total, key1, key2, ...]` where
/// each key is `ticket:{id}`.
fn parse_search_doc_ids(value: &Value) -> Vec<u64> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .skip(1)
        .filter_map(|item| {
            let Value::BulkString(raw) = item else {
                return None;
            };
            std::str::from_utf8(raw)
                .ok()?
                .strip_prefix("ticket:")?
                .parse()
                .ok()
        })
        .collect()
}

/// `XREADGROUP` over a single stream replies
/// `[[stream_key, [[entry_id, [field, value, ...]], ...]]]`.
fn parse_single_stream_entry(value: &Value) -> Option<StreamEntry> {
    let Value::Array(streams) = value else {
        return None;
    };
    let Value::Array(stream_pair) = streams.first()? else {
        return None;
    };
    let Value::Array(entries) = stream_pair.get(1)? else {
        return None;
    };
    let Value::Array(entry) = entries.first()? else {
        return None;
    };
    let Value::BulkString(entry_id_bytes) = entry.first()? else {
        return None;
    };
    let entry_id = String::from_utf8_lossy(entry_id_bytes).into_owned();

    let Value::Array(fields) = entry.get(1)? else {
        return None;
    };
    let ticket_id = fields
        .chunks(2)
        .find_map(|pair| {
            let Value::BulkString(name) = pair.first()? else {
                return None;
            };
            if name.as_slice() != b"ticket_id" {
                return None;
            }
            let Value::BulkString(value) = pair.get(1)? else {
                return None;
            };
            std::str::from_utf8(value).ok()?.parse::<u64>().ok()
        })?;

    Some(StreamEntry { entry_id, ticket_id })
}

/// `FT.AGGREGATE` replies `[[field, value, field, value, ...], ...]`
/// with one row per group (no leading total, unlike `FT.SEARCH`).
fn parse_hourly_aggregate(value: &Value) -> Vec<(u8, u64)> {
    let Value::Array(rows) = value else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let Value::Array(fields) = row else {
                return None;
            };
            let mut hour = None;
            let mut count = None;
            for pair in fields.chunks(2) {
                let Value::BulkString(name) = pair.first()? else {
                    continue;
                };
                let Value::BulkString(raw) = pair.get(1)? else {
                    continue;
                };
                let text = std::str::from_utf8(raw).ok()?;
                match name.as_slice() {
                    b"hour" => hour = text.parse::<f64>().ok().map(|h| h as u8),
                    b"bucket_count" => count = text.parse::<u64>().ok(),
                    _ => {}
                }
            }
            Some((hour?, count?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_count_reply() {
        let reply = Value::Array(vec![Value::Int(3)]);
        assert_eq!(parse_search_total(&reply), 3);
    }

    #[test]
    fn parses_empty_search_count_reply() {
        assert_eq!(parse_search_total(&Value::Nil), 0);
    }

    #[test]
    fn parses_search_doc_ids_reply() {
        let reply = Value::Array(vec![
            Value::Int(2),
            Value::BulkString(b"ticket:5".to_vec()),
            Value::BulkString(b"ticket:12".to_vec()),
        ]);
        assert_eq!(parse_search_doc_ids(&reply), vec![5, 12]);
    }

    #[test]
    fn parses_stream_entry_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            Value::BulkString(b"queue_stream:register".to_vec()),
            Value::Array(vec![Value::Array(vec![
                Value::BulkString(b"1700000000000-0".to_vec()),
                Value::Array(vec![
                    Value::BulkString(b"ticket_id".to_vec()),
                    Value::BulkString(b"42".to_vec()),
                ]),
            ])]),
        ])]);
        let entry = parse_single_stream_entry(&reply).expect("entry");
        assert_eq!(entry.entry_id, "1700000000000-0");
        assert_eq!(entry.ticket_id, 42);
    }

    #[test]
    fn parses_empty_stream_reply_as_none() {
        assert_eq!(parse_single_stream_entry(&Value::Nil), None);
    }

    #[test]
    fn parses_hourly_aggregate_rows() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                Value::BulkString(b"hour".to_vec()),
                Value::BulkString(b"9".to_vec()),
                Value::BulkString(b"bucket_count".to_vec()),
                Value::BulkString(b"12".to_vec()),
            ]),
            Value::Array(vec![
                Value::BulkString(b"hour".to_vec()),
                Value::BulkString(b"10".to_vec()),
                Value::BulkString(b"bucket_count".to_vec()),
                Value::BulkString(b"4".to_vec()),
            ]),
        ]);
        assert_eq!(parse_hourly_aggregate(&reply), vec![(9, 12), (10, 4)]);
    }
}
