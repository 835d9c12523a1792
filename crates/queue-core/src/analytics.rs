//! Read-only aggregates for operator dashboards (spec.md §4.4). All
//! three operations swallow backend errors into zero-valued results so a
//! dashboard stays visible even when the store is unhealthy — this is a
//! spec.md §7 requirement, not an oversight.

use std::sync::Arc;

use queue_protocol::{CounterStatsRow, HourlyDemandRow, OverallSummary};
use queue_store::{StoreAdapter, TicketStatusTag};
use tracing::warn;

pub struct AnalyticsReader {
    store: Arc<dyn StoreAdapter>,
}

impl AnalyticsReader {
    #[must_use]
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    /// Live counts across every service plus today's aggregate stats.
    /// Never errors: any failed probe degrades that field to zero.
    pub async fn overall_summary(&self, today: &str) -> OverallSummary {
        let total_issued = self.store.get_int("ticket:global:id").await.unwrap_or_else(|err| {
            warn!(%err, "failed to read global ticket id, defaulting to 0");
            0
        }) as u64;

        let live_waiting = self.count_or_zero(None, TicketStatusTag::Waiting).await;
        let live_serving = self.count_or_zero(None, TicketStatusTag::Serving).await;
        let live_done = self.count_or_zero(None, TicketStatusTag::Done).await;
        let live_cancelled = self.count_or_zero(None, TicketStatusTag::Cancelled).await;

        let (total_served_today, avg_wait_time_today) = self.today_totals(today).await;

        OverallSummary {
            total_issued,
            live_waiting,
            live_serving,
            live_done,
            live_cancelled,
            total_served_today,
            avg_wait_time_today,
        }
    }

    /// `floor((created_at + tz_offset) / 3600) mod 24`, grouped and
    /// counted, sorted ascending. Empty (not an error) on a failed probe.
    pub async fn hourly_demand(&self, tz_offset_seconds: i64) -> Vec<HourlyDemandRow> {
        match self.store.hourly_demand(tz_offset_seconds).await {
            Ok(rows) => rows
                .into_iter()
                .map(|(hour, count)| HourlyDemandRow { hour, count })
                .collect(),
            Err(err) => {
                warn!(%err, "failed to compute hourly demand, returning empty");
                Vec::new()
            }
        }
    }

    /// One row per `stats:{date}:{service}:{counter}` key. Empty (not an
    /// error) on a failed scan.
    pub async fn stats_for_date(&self, date: &str) -> Vec<CounterStatsRow> {
        let keys = match self.store.scan_stats_keys(date).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, date, "failed to scan stats keys, returning empty");
                return Vec::new();
            }
        };

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((service, counter)) = parse_stats_key(&key, date) else {
                continue;
            };
            if counter == "ALL" {
                // The ALL bucket is an aggregate, not a distinct counter
                // row — callers wanting it read `overall_summary` instead.
                continue;
            }
            let Some(hash) = self.store.hget_all(&key).await.unwrap_or(None) else {
                continue;
            };
            let count = hash.get("count").and_then(|v| v.parse().ok()).unwrap_or(0);
            rows.push(CounterStatsRow {
                service: service.to_owned(),
                counter: counter.to_owned(),
                count,
                avg_service_time_seconds: non_zero_average(&hash),
            });
        }
        rows
    }

    async fn count_or_zero(&self, service: Option<&str>, status: TicketStatusTag) -> u64 {
        self.store.count_by_status(service, status).await.unwrap_or_else(|err| {
            warn!(%err, status = status.as_str(), "failed live-count probe, defaulting to 0");
            0
        })
    }

    /// Sums `count`/`total_svc_time`/`svc_count` across every service's
    /// `stats:{today}:{service}:ALL` bucket. Only the per-service `ALL`
    /// bucket is summed, not the per-counter rows alongside it — each
    /// counter's dispatch is already folded into its service's `ALL`
    /// bucket by `StatsRecorder::record_dispatch`, so summing both would
    /// double-count every dispatch.
    async fn today_totals(&self, today: &str) -> (u64, f64) {
        let keys = match self.store.scan_stats_keys(today).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, today, "failed to scan today's stats keys, defaulting to zero");
                return (0, 0.0);
            }
        };

        let mut total_served = 0u64;
        let mut total_svc_time = 0f64;
        let mut svc_count = 0f64;
        for key in keys {
            let Some((_service, counter)) = parse_stats_key(&key, today) else {
                continue;
            };
            if counter != "ALL" {
                continue;
            }
            let Some(hash) = self.store.hget_all(&key).await.unwrap_or(None) else {
                continue;
            };
            total_served += hash.get("count").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            total_svc_time += hash.get("total_svc_time").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
            svc_count += hash.get("svc_count").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        }

        let avg = if svc_count > 0.0 { total_svc_time / svc_count } else { 0.0 };
        (total_served, avg)
    }
}

/// `total_svc_time / svc_count`, never `/ count` — the first dispatch of
/// a counter's day has no "previous" to subtract from, so `svc_count`
/// undercounts `count` by design (spec.md §4.3).
fn average(hash: &std::collections::HashMap<String, String>) -> f64 {
    non_zero_average(hash).unwrap_or(0.0)
}

fn non_zero_average(hash: &std::collections::HashMap<String, String>) -> Option<f64> {
    let total: f64 = hash.get("total_svc_time")?.parse().ok()?;
    let count: f64 = hash.get("svc_count")?.parse().ok()?;
    (count > 0.0).then_some(total / count)
}

fn parse_stats_key<'a>(key: &'a str, date: &str) -> Option<(&'a str, &'a str)> {
    let rest = key.strip_prefix("stats:")?.strip_prefix(date)?.strip_prefix(':')?;
    rest.split_once(':')
}
