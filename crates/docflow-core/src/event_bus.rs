//! Typed publish to a single broadcast topic. In-process fan-out runs over
//! `tokio::sync::broadcast`; `RedisEventBridge` mirrors the same stream onto
//! Redis so out-of-process consumers can subscribe too.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum DocumentEvent {
    #[serde(rename = "document.created")]
    Created { document_id: i64, user_id: i32 },
    #[serde(rename = "document.updated")]
    Updated { document_id: i64, user_id: i32 },
    #[serde(rename = "document.deleted")]
    Deleted { document_id: i64, user_id: i32 },
    #[serde(rename = "document.status_changed")]
    StatusChanged { document_id: i64, old_status: String, new_status: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: chrono::DateTime<Utc>,
}

impl DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "document.created",
            Self::Updated { .. } => "document.updated",
            Self::Deleted { .. } => "document.deleted",
            Self::StatusChanged { .. } => "document.status_changed",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let full = serde_json::to_value(self).unwrap_or(serde_json::json!({}));
        let data = full.get("data").cloned().unwrap_or(serde_json::json!({}));
        Envelope {
            event_type: self.event_type().to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Best-effort at-most-once delivery — `send` errors only when there are
    /// no live subscribers, which is not a failure from the publisher's
    /// point of view.
    pub fn publish(&self, event: DocumentEvent) {
        let envelope = event.to_envelope();
        if self.tx.send(envelope).is_err() {
            warn!("published event with no live subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// Bridges every published event onto a Redis channel so out-of-process
/// consumers (the worker binary, external tooling) observe the same stream
/// the in-process broadcast serves to live HTTP subscribers.
pub struct RedisEventBridge {
    pool: deadpool_redis::Pool,
    channel: String,
}

impl RedisEventBridge {
    pub fn new(pool: deadpool_redis::Pool, channel: impl Into<String>) -> Self {
        Self { pool, channel: channel.into() }
    }

    pub async fn publish(&self, event: &DocumentEvent) -> anyhow::Result<()> {
        use deadpool_redis::redis::AsyncCommands;

        let envelope = event.to_envelope();
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.pool.get().await?;
        let _: () = conn.publish(&self.channel, payload).await?;
        Ok(())
    }

    /// Spawns a background task that drains the in-process bus and mirrors
    /// every event onto Redis; delivery is at-most-once, so consumers must
    /// tolerate loss and resubscribe idempotently.
    pub fn spawn_mirror(self: std::sync::Arc<Self>, bus: &EventBus) {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let payload = match serde_json::to_string(&envelope) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        if let Err(e) = self.publish_raw(&payload).await {
                            warn!(error = %e, "redis event mirror publish failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "redis event mirror lagged, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn publish_raw(&self, payload: &str) -> anyhow::Result<()> {
        use deadpool_redis::redis::AsyncCommands;
        let mut conn = self.pool.get().await?;
        let _: () = conn.publish(&self.channel, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_dotted_event_type() {
        let ev = DocumentEvent::StatusChanged {
            document_id: 1,
            old_status: "pending".into(),
            new_status: "processing".into(),
        };
        let env = ev.to_envelope();
        assert_eq!(env.event_type, "document.status_changed");
        assert_eq!(env.data["old_status"], "pending");
    }

    #[tokio::test]
    async fn publish_with_subscriber_is_received() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(DocumentEvent::Created { document_id: 1, user_id: 1 });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "document.created");
    }
}
