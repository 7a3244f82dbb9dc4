//! Shared application state handed to every connection.

use std::sync::Arc;

use chat_gateway_auth::TokenValidator;

use crate::config::GatewayConfig;
use crate::membership::MembershipStore;
use crate::metrics::ServerMetrics;
use crate::persistence::MessageSink;
use crate::registry::ConnectionRegistry;
use crate::relay::RelayBus;
use crate::router::MessageRouter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<MessageRouter>,
    pub relay: Arc<dyn RelayBus>,
    pub validator: Arc<dyn TokenValidator>,
    pub metrics: Arc<ServerMetrics>,
    /// Random per-process id; relay frames from this process carry it.
    pub instance_id: String,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        validator: Arc<dyn TokenValidator>,
        membership: Arc<dyn MembershipStore>,
        relay: Arc<dyn RelayBus>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(ServerMetrics::new());
        let router = Arc::new(MessageRouter::new(
            instance_id.clone(),
            registry.clone(),
            membership,
            relay.clone(),
            sink,
            config.chat_policy.clone(),
            metrics.clone(),
        ));
        Self {
            config: Arc::new(config),
            registry,
            router,
            relay,
            validator,
            metrics,
            instance_id,
        }
    }
}
