//! Process-wide counters exposed on `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Connections currently open
    pub active_connections: AtomicU64,
    /// Connections opened since start
    pub total_connections: AtomicU64,
    /// Inbound frames parsed
    pub messages_received: AtomicU64,
    /// Chat envelopes handed to local writer tasks
    pub messages_delivered: AtomicU64,
    /// Relay frames published to the broker
    pub relay_published: AtomicU64,
    /// Chat envelopes delivered from relay frames
    pub relay_delivered: AtomicU64,
    /// Relay frames with no local recipients (filtered)
    pub relay_discarded: AtomicU64,
    /// Failed auth handshakes
    pub auth_failures: AtomicU64,
    /// Unparseable or out-of-order frames
    pub protocol_errors: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn relay_published(&self) {
        self.relay_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_delivered(&self, count: u64) {
        self.relay_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn relay_discarded(&self) {
        self.relay_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            relay_published: self.relay_published.load(Ordering::Relaxed),
            relay_delivered: self.relay_delivered.load(Ordering::Relaxed),
            relay_discarded: self.relay_discarded.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters (for the JSON endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub messages_received: u64,
    pub messages_delivered: u64,
    pub relay_published: u64,
    pub relay_delivered: u64,
    pub relay_discarded: u64,
    pub auth_failures: u64,
    pub protocol_errors: u64,
}
