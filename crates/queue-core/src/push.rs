//! Dedup lease plus external chat push (spec.md §4.6). Grounded in the
//! original's `linebot.LineBotApi.push_message`: here the transport is a
//! trait so tests and channel-less deployments can swap in a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use queue_protocol::QueueEvent;
use queue_store::StoreAdapter;
use tracing::warn;

use crate::error::Result;

/// A short-TTL dedup lease keeps at most one process winning the push
/// right for a given `(ticket_id, number)` pair within this window.
const DEDUP_LEASE_TTL_SECONDS: usize = 60;

#[async_trait]
pub trait ChatPush: Send + Sync {
    async fn push(&self, line_user_id: &str, message: &str) -> anyhow::Result<()>;
}

/// Pushes through the LINE Messaging API's push endpoint.
pub struct LineChatPush {
    http: reqwest::Client,
    access_token: String,
}

impl LineChatPush {
    #[must_use]
    pub fn new(access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }
}

#[async_trait]
impl ChatPush for LineChatPush {
    async fn push(&self, line_user_id: &str, message: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "to": line_user_id,
            "messages": [{ "type": "text", "text": message }],
        });
        let response = self
            .http
            .post("https://api.line.me/v2/bot/message/push")
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE push failed with {status}: {body}");
        }
        Ok(())
    }
}

/// Used by tests and by deployments with no chat channel configured.
pub struct NoOpChatPush;

#[async_trait]
impl ChatPush for NoOpChatPush {
    async fn push(&self, _line_user_id: &str, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct PushDispatcher {
    store: Arc<dyn StoreAdapter>,
    chat: Arc<dyn ChatPush>,
}

impl PushDispatcher {
    #[must_use]
    pub fn new(store: Arc<dyn StoreAdapter>, chat: Arc<dyn ChatPush>) -> Self {
        Self { store, chat }
    }

    /// Applies the dedup lease and, if this call won it, pushes a chat
    /// notification for `event`. A lost race, an anonymous ticket, or a
    /// transport failure all return `Ok(())` — push failures are logged
    /// and swallowed per spec.md §7, and the lease is never released
    /// early (its TTL is the only retry gate).
    pub async fn dispatch(&self, event: &QueueEvent) -> Result<()> {
        let dedup_key = format!("dedup:push:{}:{}", event.ticket_id, event.number);
        let won = self
            .store
            .set_nx_ex(&dedup_key, "1", DEDUP_LEASE_TTL_SECONDS)
            .await?;
        if !won {
            return Ok(());
        }

        let line_user_id = self
            .store
            .hget(&format!("ticket:{}", event.ticket_id), "line_user_id")
            .await?
            .unwrap_or_default();
        if line_user_id.is_empty() {
            return Ok(());
        }

        let message = format!(
            "Now serving number {} at counter {} ({})",
            event.number, event.counter, event.service
        );
        if let Err(err) = self.chat.push(&line_user_id, &message).await {
            warn!(ticket_id = event.ticket_id, %err, "chat push failed, not retrying");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_store::fake::FakeStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChatPush {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatPush for CountingChatPush {
        async fn push(&self, _line_user_id: &str, _message: &str) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(ticket_id: u64) -> QueueEvent {
        QueueEvent {
            ticket_id,
            number: ticket_id,
            service: "register".to_owned(),
            counter: "c1".to_owned(),
            status: None,
        }
    }

    #[tokio::test]
    async fn pushes_exactly_once_per_ticket_and_number() {
        let store = Arc::new(FakeStore::new());
        store
            .hset_all("ticket:7", &[("line_user_id", "U123")])
            .await
            .unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = PushDispatcher::new(store, Arc::new(CountingChatPush { count: count.clone() }));

        dispatcher.dispatch(&event(7)).await.unwrap();
        dispatcher.dispatch(&event(7)).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn anonymous_tickets_are_never_pushed() {
        let store = Arc::new(FakeStore::new());
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = PushDispatcher::new(store, Arc::new(CountingChatPush { count: count.clone() }));

        dispatcher.dispatch(&event(8)).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_second_process_losing_the_dedup_race_never_pushes() {
        let store = Arc::new(FakeStore::new());
        store
            .hset_all("ticket:9", &[("line_user_id", "U999")])
            .await
            .unwrap();
        // Simulate another process having already won the lease.
        assert!(store.set_nx_ex("dedup:push:9:9", "1", 60).await.unwrap());

        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = PushDispatcher::new(store, Arc::new(CountingChatPush { count: count.clone() }));
        dispatcher.dispatch(&event(9)).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
