//! The four tightly coupled subsystems spec.md calls "the core": the
//! ticket repository, the dispatch engine, the statistics recorder and
//! analytics reader, and the event bus with its push dispatcher. Nothing
//! in this crate talks HTTP; `queue-server` is the thin translation
//! layer on top.

pub mod analytics;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_bus;
pub mod push;
pub mod stats;
pub mod ticket_repo;

use std::sync::Arc;

use queue_store::StoreAdapter;
use tokio_stream::StreamExt as _;
use tracing::warn;

pub use analytics::AnalyticsReader;
pub use config::Config;
pub use dispatch::{DispatchEngine, DispatchOutcome};
pub use error::{CoreError, Result};
pub use event_bus::{EventBus, EventSubscription};
pub use push::{ChatPush, LineChatPush, NoOpChatPush, PushDispatcher};
pub use stats::StatsRecorder;
pub use ticket_repo::TicketRepo;

/// Every core subsystem, wired together. `queue-server` builds one of
/// these at startup and hands handlers an `Arc<QueueEngine>`.
pub struct QueueEngine {
    pub store: Arc<dyn StoreAdapter>,
    pub ticket_repo: Arc<TicketRepo>,
    pub dispatch: Arc<DispatchEngine>,
    pub analytics: Arc<AnalyticsReader>,
    pub bus: Arc<EventBus>,
    pub push: Arc<PushDispatcher>,
    pub config: Config,
}

impl QueueEngine {
    #[must_use]
    pub fn new(store: Arc<dyn StoreAdapter>, chat: Arc<dyn ChatPush>, config: Config) -> Arc<Self> {
        let ticket_repo = Arc::new(TicketRepo::new(store.clone()));
        let stats = Arc::new(StatsRecorder::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let dispatch = Arc::new(DispatchEngine::new(store.clone(), ticket_repo.clone(), stats));
        let analytics = Arc::new(AnalyticsReader::new(store.clone()));
        let push = Arc::new(PushDispatcher::new(store.clone(), chat));

        Arc::new(Self {
            store,
            ticket_repo,
            dispatch,
            analytics,
            bus,
            push,
            config,
        })
    }

    /// Attaches the single process-local pub/sub subscriber (spec.md
    /// §4.5) that feeds both the event bus and the push dispatcher. A
    /// no-op on any call after the first.
    pub async fn ensure_bus_subscribed(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        self.bus
            .clone()
            .ensure_subscribed(|_bus| async move {
                let store = engine.store.clone();
                let push = engine.push.clone();
                let bus = engine.bus.clone();
                tokio::spawn(async move {
                    run_pubsub_relay(store, bus, push).await;
                });
            })
            .await;
    }
}

/// The single long-lived subscriber over `channel:queue_update:*`,
/// relaying every message it sees to the in-process bus and the push
/// dispatcher. Runs for the lifetime of the process; a connection error
/// here is logged and the relay exits (the next process restart picks
/// it back up — there is no in-process retry because a subscriber
/// connection failure generally means the store itself is down).
async fn run_pubsub_relay(store: Arc<dyn StoreAdapter>, bus: Arc<EventBus>, push: Arc<PushDispatcher>) {
    let mut stream = match store.subscribe_pattern("channel:queue_update:*").await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "failed to attach pub/sub subscriber; live updates will not flow");
            return;
        }
    };

    while let Some(message) = stream.next().await {
        let event: queue_protocol::QueueEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, channel = %message.channel, "dropping undecodable queue update");
                continue;
            }
        };

        bus.announce(event.clone()).await;
        if let Err(err) = push.dispatch(&event).await {
            warn!(%err, ticket_id = event.ticket_id, "push dispatch failed");
        }
    }
}
