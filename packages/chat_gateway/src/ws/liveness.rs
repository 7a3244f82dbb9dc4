//! Heartbeat/Liveness Monitor
//!
//! Each connection tracks its last read and write activity in atomics
//! stamped by the reader and writer tasks. A per-connection liveness
//! task ticks once a second, and on an idle threshold sends a single
//! `heartbeat` probe. If nothing arrives within the grace window the
//! connection is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LivenessConfig;
use crate::registry::EnvelopeSender;
use crate::ws::protocol::{ConnectionId, ServerEnvelope};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Last-activity timestamps for one connection, shared between the
/// reader task, writer task, and liveness task.
#[derive(Debug)]
pub struct IdleTracker {
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
}

impl IdleTracker {
    pub fn new() -> Self {
        let now = epoch_ms();
        Self {
            last_read_ms: AtomicU64::new(now),
            last_write_ms: AtomicU64::new(now),
        }
    }

    pub fn touch_read(&self) {
        self.last_read_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn touch_write(&self) {
        self.last_write_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn last_read_ms(&self) -> u64 {
        self.last_read_ms.load(Ordering::Relaxed)
    }

    pub fn last_write_ms(&self) -> u64 {
        self.last_write_ms.load(Ordering::Relaxed)
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LivenessAction {
    None,
    Probe,
    Close(&'static str),
}

/// Per-connection probe state machine, separated from the clock so the
/// decision logic is testable with fabricated timestamps.
#[derive(Debug, Default)]
pub struct LivenessState {
    probe_sent_at_ms: Option<u64>,
}

impl LivenessState {
    pub fn tick(
        &mut self,
        now_ms: u64,
        last_read_ms: u64,
        last_write_ms: u64,
        config: &LivenessConfig,
    ) -> LivenessAction {
        let read_idle = now_ms.saturating_sub(last_read_ms);
        let write_idle = now_ms.saturating_sub(last_write_ms);
        // Both directions silent; the interesting threshold.
        let all_idle = read_idle.min(write_idle);

        if let Some(sent_ms) = self.probe_sent_at_ms {
            if last_read_ms > sent_ms {
                // Any inbound traffic answers the probe.
                self.probe_sent_at_ms = None;
            } else if now_ms >= sent_ms + config.probe_grace.as_millis() as u64 {
                return LivenessAction::Close("liveness probe unanswered");
            } else {
                return LivenessAction::None;
            }
        }

        if read_idle >= config.reader_idle.as_millis() as u64 {
            return LivenessAction::Close("reader idle limit reached");
        }
        if all_idle >= config.all_idle.as_millis() as u64
            || write_idle >= config.writer_idle.as_millis() as u64
        {
            self.probe_sent_at_ms = Some(now_ms);
            return LivenessAction::Probe;
        }
        LivenessAction::None
    }
}

/// Drives [`LivenessState`] against the wall clock for one connection.
/// Exits when the connection is cancelled or its writer channel closes.
pub async fn liveness_task(
    conn_id: ConnectionId,
    idle: Arc<IdleTracker>,
    tx: EnvelopeSender,
    cancel: CancellationToken,
    config: LivenessConfig,
) {
    let mut state = LivenessState::default();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match state.tick(
            epoch_ms(),
            idle.last_read_ms(),
            idle.last_write_ms(),
            &config,
        ) {
            LivenessAction::None => {}
            LivenessAction::Probe => {
                debug!(%conn_id, "sending liveness probe");
                if tx.send(ServerEnvelope::heartbeat_probe()).is_err() {
                    break;
                }
            }
            LivenessAction::Close(reason) => {
                info!(%conn_id, reason, "closing idle connection");
                cancel.cancel();
                break;
            }
        }
    }
}
