//! Per-day, per-(service, counter) dispatch counters and service-time
//! samples (spec.md §4.3).

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use queue_store::{PipelineOp, StoreAdapter};
use tracing::debug;

use crate::error::Result;

/// Service-time samples spanning more than this are discarded: a gap
/// this long is a lunch break or an overnight pause, not genuine
/// service time.
const MAX_SAMPLE_GAP_SECONDS: i64 = 3_600;

pub struct StatsRecorder {
    store: Arc<dyn StoreAdapter>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    /// Records one successful dispatch of `counter` in `service` at wall
    /// clock `dispatched_at` (unix seconds). The last-activity read gates
    /// whether a service-time sample is recorded, so it happens first;
    /// every write that follows is batched into a single pipelined round
    /// trip.
    pub async fn record_dispatch(&self, service: &str, counter: &str, dispatched_at: i64) -> Result<()> {
        let date = date_bucket(dispatched_at);
        let per_counter_key = format!("stats:{date}:{service}:{counter}");
        let all_key = format!("stats:{date}:{service}:ALL");
        let activity_key = format!("counter:last_activity:{service}:{counter}");

        let last_activity = self.store.get_int(&activity_key).await?;

        let mut ops = vec![
            PipelineOp::HincrBy { key: per_counter_key.clone(), field: "count".to_owned(), delta: 1 },
            PipelineOp::HincrBy { key: all_key.clone(), field: "count".to_owned(), delta: 1 },
        ];

        if last_activity > 0 {
            let delta = dispatched_at - last_activity;
            if delta >= 0 && delta < MAX_SAMPLE_GAP_SECONDS {
                ops.push(PipelineOp::HincrBy { key: per_counter_key.clone(), field: "total_svc_time".to_owned(), delta });
                ops.push(PipelineOp::HincrBy { key: per_counter_key, field: "svc_count".to_owned(), delta: 1 });
                ops.push(PipelineOp::HincrBy { key: all_key.clone(), field: "total_svc_time".to_owned(), delta });
                ops.push(PipelineOp::HincrBy { key: all_key, field: "svc_count".to_owned(), delta: 1 });
            } else {
                debug!(service, counter, delta, "discarding out-of-range service-time sample");
            }
        }

        ops.push(PipelineOp::SetInt { key: activity_key, value: dispatched_at });

        self.store.pipeline(ops).await?;
        Ok(())
    }
}

/// `YYYYMMDD` for the UTC calendar day containing `unix_seconds`.
fn date_bucket(unix_seconds: i64) -> String {
    Utc.timestamp_opt(unix_seconds, 0)
        .single()
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_store::fake::FakeStore;

    fn recorder() -> (StatsRecorder, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        (StatsRecorder::new(store.clone()), store)
    }

    #[test]
    fn date_bucket_formats_as_yyyymmdd() {
        assert_eq!(date_bucket(1_700_000_000), "20231114");
    }

    #[tokio::test]
    async fn first_dispatch_of_the_day_has_no_service_time_sample() {
        let (recorder, store) = recorder();
        recorder.record_dispatch("register", "c1", 1_700_000_000).await.unwrap();

        let date = date_bucket(1_700_000_000);
        let hash = store
            .hget_all(&format!("stats:{date}:register:c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hash.get("count").map(String::as_str), Some("1"));
        assert!(hash.get("svc_count").is_none());
    }

    #[tokio::test]
    async fn second_dispatch_within_an_hour_records_a_service_time_sample() {
        let (recorder, store) = recorder();
        recorder.record_dispatch("register", "c1", 1_700_000_000).await.unwrap();
        recorder.record_dispatch("register", "c1", 1_700_000_005).await.unwrap();

        let date = date_bucket(1_700_000_000);
        let per_counter = store
            .hget_all(&format!("stats:{date}:register:c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(per_counter.get("count").map(String::as_str), Some("2"));
        assert_eq!(per_counter.get("svc_count").map(String::as_str), Some("1"));
        assert_eq!(per_counter.get("total_svc_time").map(String::as_str), Some("5"));

        let all = store
            .hget_all(&format!("stats:{date}:register:ALL"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(all.get("svc_count").map(String::as_str), Some("1"));
        assert_eq!(all.get("total_svc_time").map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn a_gap_over_an_hour_is_discarded() {
        let (recorder, store) = recorder();
        recorder.record_dispatch("register", "c1", 1_700_000_000).await.unwrap();
        recorder.record_dispatch("register", "c1", 1_700_000_000 + 3_601).await.unwrap();

        let date = date_bucket(1_700_000_000);
        let per_counter = store
            .hget_all(&format!("stats:{date}:register:c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(per_counter.get("count").map(String::as_str), Some("2"));
        assert!(per_counter.get("svc_count").is_none());
    }
}
