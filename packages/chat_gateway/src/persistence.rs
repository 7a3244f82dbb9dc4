//! Chat history hand-off.
//!
//! The gateway never stores messages. Routed messages are offered to a
//! [`MessageSink`] (the platform's history pipeline); sink failures are
//! logged and never block or fail delivery.

use async_trait::async_trait;
use tracing::debug;

use crate::ws::protocol::ChatDelivery;

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn record(&self, message_id: &str, delivery: &ChatDelivery) -> anyhow::Result<()>;
}

/// Discards everything. Used when no history pipeline is wired up.
pub struct NullMessageSink;

#[async_trait]
impl MessageSink for NullMessageSink {
    async fn record(&self, message_id: &str, delivery: &ChatDelivery) -> anyhow::Result<()> {
        debug!(
            message_id,
            from = delivery.from_user_id,
            target = delivery.target_id,
            "message not persisted (null sink)"
        );
        Ok(())
    }
}
