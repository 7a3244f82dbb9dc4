//! Cross-Process Relay
//!
//! Broadcast-and-filter fan-out between gateway processes. The router
//! publishes every routed message to one shared channel with its
//! resolved recipient list; every process (including the publisher)
//! receives every frame and delivers to whichever recipients it holds
//! locally, discarding the rest. Frames from this process are skipped
//! on receipt because local delivery already happened at publish time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::GatewayError;
use crate::metrics::ServerMetrics;
use crate::registry::ConnectionRegistry;
use crate::ws::protocol::{ServerEnvelope, UserId};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// One routed message on the relay channel. `envelope` is the exact
/// `chat_message` envelope local recipients got, so peer processes
/// deliver without re-resolving membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Instance id of the publishing process.
    pub origin: String,
    pub recipients: Vec<UserId>,
    pub envelope: ServerEnvelope,
}

#[async_trait]
pub trait RelayBus: Send + Sync {
    /// Publishes a frame to the shared channel. At-most-once: failures
    /// are reported but nothing is retried or queued.
    async fn publish(&self, frame: &RelayFrame) -> Result<(), GatewayError>;

    /// Opens the process-wide subscription. Called once at startup,
    /// before connections are accepted.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayFrame>, GatewayError>;
}

/// In-process loopback bus for single-node mode and tests. Mirrors the
/// broker's semantics: the publisher's own subscription sees its
/// frames too.
pub struct LocalRelay {
    tx: broadcast::Sender<RelayFrame>,
}

impl LocalRelay {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayBus for LocalRelay {
    async fn publish(&self, frame: &RelayFrame) -> Result<(), GatewayError> {
        // No subscriber yet means nothing to deliver, not a failure.
        let _ = self.tx.send(frame.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayFrame>, GatewayError> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("local relay subscriber lagged by {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }
}

/// Redis pub/sub bus. Publishing goes through a [`ConnectionManager`]
/// (auto-reconnecting); the subscription runs its own reconnect loop
/// since pub/sub connections cannot be managed.
pub struct RedisRelay {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisRelay {
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, GatewayError> {
        let client = redis::Client::open(url)
            .map_err(|err| GatewayError::RelayUnavailable(err.to_string()))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| GatewayError::RelayUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            publisher,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl RelayBus for RedisRelay {
    async fn publish(&self, frame: &RelayFrame) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(frame)
            .map_err(|err| GatewayError::RelayUnavailable(format!("encoding frame: {err}")))?;
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(self.channel.as_str(), payload)
            .await
            .map_err(|err| GatewayError::RelayUnavailable(err.to_string()))
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayFrame>, GatewayError> {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(err) = pubsub.subscribe(&channel).await {
                            warn!("relay subscribe failed: {}", err);
                        } else {
                            debug!(channel = %channel, "relay subscription established");
                            let mut messages = pubsub.on_message();
                            while let Some(msg) = messages.next().await {
                                let payload: String = match msg.get_payload() {
                                    Ok(payload) => payload,
                                    Err(err) => {
                                        warn!("relay payload not a string: {}", err);
                                        continue;
                                    }
                                };
                                match serde_json::from_str::<RelayFrame>(&payload) {
                                    Ok(frame) => {
                                        if out_tx.send(frame).is_err() {
                                            return;
                                        }
                                    }
                                    Err(err) => {
                                        warn!("discarding malformed relay frame: {}", err)
                                    }
                                }
                            }
                            warn!("relay subscription stream ended");
                        }
                    }
                    Err(err) => warn!("relay connection failed: {}", err),
                }
                if out_tx.is_closed() {
                    return;
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        });
        Ok(out_rx)
    }
}

/// Delivers one received frame to local recipients.
pub(crate) fn apply_frame(
    registry: &ConnectionRegistry,
    metrics: &ServerMetrics,
    instance_id: &str,
    frame: RelayFrame,
) {
    if frame.origin == instance_id {
        // Our own publication; local delivery already happened.
        return;
    }
    let mut delivered = 0;
    for user_id in &frame.recipients {
        delivered += registry.deliver(*user_id, None, &frame.envelope);
    }
    if delivered == 0 {
        trace!(origin = %frame.origin, "relay frame had no local recipients");
        metrics.relay_discarded();
    } else {
        metrics.relay_delivered(delivered as u64);
    }
}

/// Process-lifetime pump from the relay subscription into the local
/// registry. Runs until shutdown.
pub async fn run_relay_subscriber(
    relay: Arc<dyn RelayBus>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    instance_id: String,
    shutdown: CancellationToken,
) -> Result<(), GatewayError> {
    let mut rx = relay.subscribe().await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => apply_frame(&registry, &metrics, &instance_id, frame),
                None => {
                    return Err(GatewayError::RelayUnavailable(
                        "subscription stream closed".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{ChatDelivery, ChatKind, ConnectionId};
    use tokio::sync::mpsc::error::TryRecvError;

    fn frame(origin: &str, recipients: Vec<UserId>) -> RelayFrame {
        let delivery = ChatDelivery {
            from_user_id: 1,
            content: "hi".to_string(),
            target_id: 2,
            chat_type: ChatKind::Private,
            chat_id: None,
            message_type: None,
        };
        RelayFrame {
            origin: origin.to_string(),
            recipients,
            envelope: ServerEnvelope::chat_message(delivery, "m-1".to_string()),
        }
    }

    #[test]
    fn frame_round_trips() {
        let original = frame("proc-a", vec![2, 3]);
        let json = serde_json::to_string(&original).unwrap();
        let back: RelayFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[tokio::test]
    async fn local_relay_loops_back() {
        let relay = LocalRelay::new();
        let mut rx = relay.subscribe().await.unwrap();
        relay.publish(&frame("proc-a", vec![2])).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.origin, "proc-a");
        assert_eq!(received.recipients, vec![2]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let relay = LocalRelay::new();
        assert!(relay.publish(&frame("proc-a", vec![2])).await.is_ok());
    }

    #[test]
    fn own_frames_are_skipped() {
        let registry = ConnectionRegistry::new();
        let metrics = ServerMetrics::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(2, ConnectionId::new_v4(), tx);

        apply_frame(&registry, &metrics, "proc-a", frame("proc-a", vec![2]));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(metrics.snapshot().relay_delivered, 0);
    }

    #[test]
    fn peer_frames_reach_local_recipients() {
        let registry = ConnectionRegistry::new();
        let metrics = ServerMetrics::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(2, ConnectionId::new_v4(), tx);

        apply_frame(&registry, &metrics, "proc-a", frame("proc-b", vec![2, 5]));
        assert!(rx.try_recv().is_ok());
        assert_eq!(metrics.snapshot().relay_delivered, 1);
    }

    #[test]
    fn frames_with_no_local_recipients_are_discarded() {
        let registry = ConnectionRegistry::new();
        let metrics = ServerMetrics::new();

        apply_frame(&registry, &metrics, "proc-a", frame("proc-b", vec![7]));
        assert_eq!(metrics.snapshot().relay_discarded, 1);
    }

    #[tokio::test]
    async fn subscriber_pump_delivers_until_shutdown() {
        let relay = Arc::new(LocalRelay::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(2, ConnectionId::new_v4(), tx);

        let shutdown = CancellationToken::new();
        let pump = tokio::spawn(run_relay_subscriber(
            relay.clone() as Arc<dyn RelayBus>,
            registry.clone(),
            metrics.clone(),
            "proc-a".to_string(),
            shutdown.clone(),
        ));
        // Give the pump a beat to subscribe before publishing.
        tokio::task::yield_now().await;
        relay.publish(&frame("proc-b", vec![2])).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match received.frame {
            crate::ws::protocol::ServerFrame::ChatMessage(delivery) => {
                assert_eq!(delivery.from_user_id, 1)
            }
            other => panic!("Expected ChatMessage, got {other:?}"),
        }

        shutdown.cancel();
        assert!(pump.await.unwrap().is_ok());
    }
}
