//! Connection Registry
//!
//! Per-process mapping between authenticated users and their live
//! WebSocket connections. A user may hold several connections (multiple
//! devices); each connection belongs to at most one user.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ws::protocol::{ConnectionId, ServerEnvelope, UserId};

/// Handle for delivering frames to one connection's writer task.
pub type EnvelopeSender = mpsc::UnboundedSender<ServerEnvelope>;

struct ConnectionEntry {
    user_id: UserId,
    sender: EnvelopeSender,
}

/// Sharded two-map registry. Lookups by user and by connection are both
/// O(1); there is no single global lock.
///
/// Update ordering keeps the maps convergent under concurrency: on
/// register the connection entry is inserted before the user index, on
/// deregister the connection entry is removed first. A reader may
/// transiently see a connection without its user index entry, never the
/// reverse with a stale sender.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_conn: DashMap<ConnectionId, ConnectionEntry>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an authenticated connection to its user. Called once per
    /// connection, after the auth handshake succeeds.
    pub fn register(&self, user_id: UserId, conn_id: ConnectionId, sender: EnvelopeSender) {
        self.by_conn
            .insert(conn_id, ConnectionEntry { user_id, sender });
        self.by_user.entry(user_id).or_default().insert(conn_id);
        debug!(%conn_id, user_id, "connection registered");
    }

    /// Removes a connection. Idempotent; returns the user it was bound
    /// to, if any. The user index entry is dropped when this was the
    /// user's last connection.
    pub fn deregister(&self, conn_id: ConnectionId) -> Option<UserId> {
        let (_, entry) = self.by_conn.remove(&conn_id)?;
        if let Some(mut conns) = self.by_user.get_mut(&entry.user_id) {
            conns.remove(&conn_id);
        }
        self.by_user
            .remove_if(&entry.user_id, |_, conns| conns.is_empty());
        debug!(%conn_id, user_id = entry.user_id, "connection deregistered");
        Some(entry.user_id)
    }

    /// The user a connection is bound to, if it is registered.
    pub fn user_of(&self, conn_id: ConnectionId) -> Option<UserId> {
        self.by_conn.get(&conn_id).map(|entry| entry.user_id)
    }

    /// Whether the user has at least one connection on this process.
    pub fn is_local(&self, user_id: UserId) -> bool {
        self.by_user
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Sends `envelope` to every local connection of `user_id`, minus
    /// `exclude`. Returns the number of connections reached. Sends to
    /// closing connections fail silently; cleanup owns their removal.
    pub fn deliver(
        &self,
        user_id: UserId,
        exclude: Option<ConnectionId>,
        envelope: &ServerEnvelope,
    ) -> usize {
        let conn_ids: Vec<ConnectionId> = match self.by_user.get(&user_id) {
            Some(conns) => conns
                .iter()
                .copied()
                .filter(|id| Some(*id) != exclude)
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for conn_id in conn_ids {
            if let Some(entry) = self.by_conn.get(&conn_id) {
                if entry.sender.send(envelope.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.by_conn.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}
