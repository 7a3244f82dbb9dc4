//! Message Router
//!
//! Resolves a validated chat payload to its recipient set, delivers to
//! local connections through the registry, and publishes the frame to
//! the relay for peer processes. Delivery is at-most-once and
//! best-effort end to end.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ChatPolicy;
use crate::error::GatewayError;
use crate::membership::MembershipStore;
use crate::metrics::ServerMetrics;
use crate::persistence::MessageSink;
use crate::registry::{ConnectionRegistry, EnvelopeSender};
use crate::relay::{RelayBus, RelayFrame};
use crate::ws::protocol::{ChatDelivery, ChatKind, ChatPayload, ConnectionId, ServerEnvelope, UserId};

pub struct MessageRouter {
    instance_id: String,
    registry: Arc<ConnectionRegistry>,
    membership: Arc<dyn MembershipStore>,
    relay: Arc<dyn RelayBus>,
    sink: Arc<dyn MessageSink>,
    policy: ChatPolicy,
    metrics: Arc<ServerMetrics>,
}

impl MessageRouter {
    pub fn new(
        instance_id: String,
        registry: Arc<ConnectionRegistry>,
        membership: Arc<dyn MembershipStore>,
        relay: Arc<dyn RelayBus>,
        sink: Arc<dyn MessageSink>,
        policy: ChatPolicy,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            instance_id,
            registry,
            membership,
            relay,
            sink,
            policy,
            metrics,
        }
    }

    fn validate(payload: &ChatPayload) -> Result<(), GatewayError> {
        if payload.content.trim().is_empty() {
            return Err(GatewayError::Validation("content must not be empty".into()));
        }
        if payload.target_id <= 0 {
            return Err(GatewayError::Validation("targetId must be positive".into()));
        }
        Ok(())
    }

    /// Routes one chat message from an authenticated connection.
    /// `origin` never receives its own message; the ack goes only to
    /// `reply` (the originating connection's channel).
    pub async fn route(
        &self,
        from: UserId,
        origin: ConnectionId,
        payload: ChatPayload,
        reply: &EnvelopeSender,
    ) -> Result<(), GatewayError> {
        Self::validate(&payload)?;
        let target_id = payload.target_id;
        let kind = payload.chat_type;

        let mut recipients: HashSet<UserId> = match kind {
            ChatKind::Private => HashSet::from([target_id]),
            ChatKind::Group => self.membership.members_of(target_id).await?,
        };
        if kind == ChatKind::Group && !self.policy.group_echo_to_sender_devices {
            recipients.remove(&from);
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let delivery = ChatDelivery::bind(from, payload);
        let envelope = ServerEnvelope::chat_message(delivery.clone(), message_id.clone());

        let mut local = 0;
        for user_id in &recipients {
            // Echo suppression: the sender's own connections minus the
            // one the message came in on.
            let exclude = (*user_id == from).then_some(origin);
            local += self.registry.deliver(*user_id, exclude, &envelope);
        }
        self.metrics.messages_delivered(local as u64);

        if !recipients.is_empty() {
            let frame = RelayFrame {
                origin: self.instance_id.clone(),
                recipients: recipients.into_iter().collect(),
                envelope,
            };
            let relay = self.relay.clone();
            let metrics = self.metrics.clone();
            // Fire-and-forget: a broker outage only costs the remote
            // copies of this one message.
            tokio::spawn(async move {
                match relay.publish(&frame).await {
                    Ok(()) => metrics.relay_published(),
                    Err(err) => warn!(
                        recipients = frame.recipients.len(),
                        "relay publish failed: {}", err
                    ),
                }
            });
        }

        let sink = self.sink.clone();
        let sink_message_id = message_id.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.record(&sink_message_id, &delivery).await {
                warn!(message_id = %sink_message_id, "message sink failed: {:#}", err);
            }
        });

        let _ = reply.send(ServerEnvelope::message_sent(&message_id, target_id));
        debug!(from, target_id, local, "chat routed");
        Ok(())
    }
}
