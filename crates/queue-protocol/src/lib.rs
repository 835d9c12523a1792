// queue-protocol: wire types shared between the store, core, and HTTP layers.
//
// Nothing here talks to a backing store or a socket; it's the vocabulary the
// rest of the workspace agrees on.

use serde::{Deserialize, Serialize};

/// A ticket's position in its lifecycle. See the transition graph in the
/// ticket repository: `waiting -> {serving, cancelled}`, `serving -> {done,
/// cancelled}`. `done` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Waiting,
    Serving,
    Done,
    Cancelled,
}

impl TicketStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Serving => "serving",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "serving" => Some(Self::Serving),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// The persisted ticket record, as read back from `ticket:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub service: String,
    pub status: TicketStatus,
    pub created_at: i64,
    pub called_at: Option<i64>,
    pub counter: Option<String>,
    pub line_user_id: Option<String>,
    pub token: String,
}

/// `get_ticket` response: a ticket plus the derived fields that make it
/// useful to a viewer (how many people are ahead, what number is currently
/// being served in this service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub ahead_count: u64,
    pub current_number: Option<u64>,
}

impl TicketView {
    /// A `serving` ticket whose number the operator has already moved past.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.ticket.status == TicketStatus::Serving
            && self
                .current_number
                .is_some_and(|current| current > self.ticket.id)
    }

    /// `done`, `cancelled`, or passed: the ticket view renders as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(
            self.ticket.status,
            TicketStatus::Done | TicketStatus::Cancelled
        ) || self.is_passed()
    }
}

/// Response to `POST /session/ticket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTicketResponse {
    pub ticket_id: u64,
    pub number: u64,
    pub service: String,
    pub created_at: i64,
    pub token: String,
}

/// Response to `GET /session/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub has_ticket: bool,
    pub ticket_id: Option<u64>,
    pub service: Option<String>,
}

/// Body of `POST /counter/{service}/next`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallNextRequest {
    #[serde(default = "default_counter")]
    pub counter: String,
}

fn default_counter() -> String {
    "counter-1".to_owned()
}

/// A dispatch/fan-out event, published on `channel:queue_update:{service}`
/// and relayed verbatim (as an SSE frame) to every connected live-view
/// client. `status` and `ticket_id: 0` are only present on the synthetic
/// frame a freshly-connected client receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub ticket_id: u64,
    pub number: u64,
    pub service: String,
    pub counter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl QueueEvent {
    /// The frame sent to a client on first connect, carrying the service's
    /// current number so the page is never blank before the next dispatch.
    #[must_use]
    pub fn initial(service: &str, current_number: u64) -> Self {
        Self {
            ticket_id: 0,
            number: current_number,
            service: service.to_owned(),
            counter: String::new(),
            status: Some("update".to_owned()),
        }
    }
}

/// One row of `get_stats_for_date`: a single `(date, service, counter)`
/// bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterStatsRow {
    pub service: String,
    pub counter: String,
    pub count: u64,
    pub avg_service_time_seconds: Option<f64>,
}

/// `GET /admin/api/summary` response. Fields default to zero when the
/// backing store is unreachable, per the "analytics degrade, don't fail"
/// error policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    pub total_issued: u64,
    pub live_waiting: u64,
    pub live_serving: u64,
    pub live_done: u64,
    pub live_cancelled: u64,
    pub total_served_today: u64,
    pub avg_wait_time_today: f64,
}

impl Default for OverallSummary {
    fn default() -> Self {
        Self {
            total_issued: 0,
            live_waiting: 0,
            live_serving: 0,
            live_done: 0,
            live_cancelled: 0,
            total_served_today: 0,
            avg_wait_time_today: 0.0,
        }
    }
}

/// One bucket of `GET /admin/api/demand`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyDemandRow {
    pub hour: u8,
    pub count: u64,
}

/// Uniform JSON error body for every failing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
