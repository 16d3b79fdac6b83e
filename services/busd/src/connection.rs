//! One accepted client connection.
//!
//! The read half stays with the per-connection read loop; this record owns
//! the write half behind a lock so routing from any task can deliver frames
//! without interleaving bytes. Identity is frozen exactly once at
//! identification.

use bus_protocol::{Args, serialize};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::warn;

/// Monotonically increasing per-process client id, rendered as a decimal
/// string at the protocol layer. Never reused.
pub type ClientId = u64;

/// Fields captured from a client's HELLO. Present iff the connection has
/// identified.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    /// Excluded from broadcast fan-out, still reachable by unicast.
    pub private_only: bool,
}

pub struct Connection {
    id: ClientId,
    peer: String,
    identity: OnceLock<Identity>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(id: ClientId, peer: String, writer: OwnedWriteHalf) -> Self {
        Connection {
            id,
            peer,
            identity: OnceLock::new(),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The id as it appears on the wire.
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }

    /// Peer address, for display only.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_identified(&self) -> bool {
        self.identity.get().is_some()
    }

    pub fn user_agent(&self) -> &str {
        self.identity.get().map_or("Unknown", |i| i.user_agent.as_str())
    }

    pub fn private_only(&self) -> bool {
        self.identity.get().is_some_and(|i| i.private_only)
    }

    /// `"<user_agent>:<id>"`, or `"Unknown:<id>"` before identification.
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.user_agent(), self.id)
    }

    /// Record the identity captured from HELLO. Returns false if the
    /// connection had already identified.
    pub fn identify(&self, user_agent: String, private_only: bool) -> bool {
        self.identity
            .set(Identity {
                user_agent,
                private_only,
            })
            .is_ok()
    }

    /// Serialize and write one frame. Returns false on any failure; the
    /// failure never propagates past this point.
    pub async fn send(&self, message_id: &str, args: &Args) -> bool {
        let frame = match serialize(message_id, args) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client_id = self.id, error = %e, message_id, "failed to serialize outgoing frame");
                return false;
            }
        };
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut writer = self.writer.lock().await;
        match writer.write_all(&frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(client_id = self.id, error = %e, message_id, "send failed");
                // No bytes may follow a torn frame; the owning read loop
                // still handles registry cleanup.
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Shut the socket down so the owning read loop observes EOF.
    /// Idempotent.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("identified", &self.is_identified())
            .finish_non_exhaustive()
    }
}
