/// Outbound bridge: best-effort fan-out of channel traffic to consumers
/// that do not speak the line protocol.
///
/// Publishing never blocks or fails in-protocol delivery: the dispatcher
/// hands events to [`spawn_publish`] and moves on. Failures are logged and
/// counted, nothing more.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::metrics;

/// One channel message as seen by external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeEvent {
    pub channel: String,
    pub sender_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Upper bound on one publish, connect included.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait OutboundBridge: Send + Sync {
    async fn publish(&self, channel_id: &str, event: &BridgeEvent) -> Result<(), BridgeError>;
}

/// Bridge used when no external consumer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBridge;

#[async_trait]
impl OutboundBridge for NoopBridge {
    async fn publish(&self, _channel_id: &str, _event: &BridgeEvent) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Appends each event to a per-channel Redis stream:
/// `XADD <prefix><channel_id> * event <json>`.
pub struct RedisStreamBridge {
    client: redis::Client,
    prefix: String,
    /// Shared multiplexed connection, dropped after a failed publish.
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStreamBridge {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: prefix.to_owned(),
            conn: Mutex::new(None),
        })
    }

    pub fn stream_key(&self, channel_id: &str) -> String {
        format!("{}{}", self.prefix, channel_id)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BridgeError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl OutboundBridge for RedisStreamBridge {
    async fn publish(&self, channel_id: &str, event: &BridgeEvent) -> Result<(), BridgeError> {
        let json = serde_json::to_string(event)?;
        let key = self.stream_key(channel_id);
        let mut conn = self.connection().await?;

        let result = redis::cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("event")
            .arg(&json)
            .query_async::<String>(&mut conn)
            .await;

        match result {
            Ok(id) => {
                debug!(stream = %key, %id, "bridged channel message");
                Ok(())
            }
            Err(e) => {
                // Force a reconnect on the next publish.
                self.conn.lock().await.take();
                Err(e.into())
            }
        }
    }
}

/// Publish without waiting. Each publish is bounded by [`PUBLISH_TIMEOUT`]
/// so an unreachable backend cannot pile up tasks. Errors are swallowed
/// after logging.
pub fn spawn_publish(bridge: Arc<dyn OutboundBridge>, channel_id: String, event: BridgeEvent) {
    tokio::spawn(async move {
        let result = match tokio::time::timeout(PUBLISH_TIMEOUT, bridge.publish(&channel_id, &event)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(PUBLISH_TIMEOUT)),
        };
        if let Err(e) = result {
            metrics::bridge_failure();
            warn!(channel = %channel_id, "bridge publish failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stream_key_uses_prefix() {
        let bridge = RedisStreamBridge::new("redis://127.0.0.1:6379", "swarm:channel:").unwrap();
        assert_eq!(bridge.stream_key("#general"), "swarm:channel:#general");
    }

    #[test]
    fn event_serializes_flat() {
        let event = BridgeEvent {
            channel: "#general".into(),
            sender_id: "a1".into(),
            sender: "alpha".into(),
            text: "hi".into(),
            timestamp: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "#general");
        assert_eq!(json["sender"], "alpha");
        assert_eq!(json["timestamp"], "2026-01-02T03:04:05Z");
    }

    #[tokio::test]
    async fn spawned_failure_is_swallowed() {
        struct Failing;
        #[async_trait]
        impl OutboundBridge for Failing {
            async fn publish(&self, _: &str, _: &BridgeEvent) -> Result<(), BridgeError> {
                Err(serde_json::from_str::<u8>("x").unwrap_err().into())
            }
        }
        let event = BridgeEvent {
            channel: "#g".into(),
            sender_id: "a".into(),
            sender: "a".into(),
            text: "t".into(),
            timestamp: Utc::now(),
        };
        spawn_publish(Arc::new(Failing), "#g".into(), event);
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_publish_is_abandoned() {
        struct Stalled(Arc<()>);
        #[async_trait]
        impl OutboundBridge for Stalled {
            async fn publish(&self, _: &str, _: &BridgeEvent) -> Result<(), BridgeError> {
                let _held = self.0.clone();
                std::future::pending().await
            }
        }
        let marker = Arc::new(());
        let event = BridgeEvent {
            channel: "#g".into(),
            sender_id: "a".into(),
            sender: "a".into(),
            text: "t".into(),
            timestamp: Utc::now(),
        };
        spawn_publish(Arc::new(Stalled(marker.clone())), "#g".into(), event);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        // The task and its in-flight publish hold two extra references.
        assert_eq!(Arc::strong_count(&marker), 3);

        tokio::time::sleep(PUBLISH_TIMEOUT + Duration::from_secs(1)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
