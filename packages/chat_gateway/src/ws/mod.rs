//! WebSocket layer: wire protocol, the per-connection actor, and the
//! liveness monitor.

pub mod connection;
pub mod liveness;
pub mod protocol;
