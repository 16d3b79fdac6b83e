//! Client membership.
//!
//! The registry is the sole source of truth for who is connected. Id
//! assignment happens under the same lock as insertion, and removal returns
//! the departure decision (whether the client had identified, hence whether
//! a LEAVE must be broadcast) from inside the same critical section.
//!
//! Iteration order is id order, which equals assignment order — the order
//! LIST_CLIENTS exposes to clients.

use crate::connection::{ClientId, Connection};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: ClientId,
    clients: BTreeMap<ClientId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Allocate the next id and insert the connection built from it.
    pub async fn insert(
        &self,
        build: impl FnOnce(ClientId) -> Arc<Connection>,
    ) -> Arc<Connection> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let conn = build(id);
        inner.clients.insert(id, Arc::clone(&conn));
        conn
    }

    /// Look up a connection by its wire id. Only decimal strings that name
    /// a live connection resolve.
    pub async fn lookup(&self, id_str: &str) -> Option<Arc<Connection>> {
        let id: ClientId = id_str.parse().ok()?;
        self.inner.lock().await.clients.get(&id).cloned()
    }

    /// Remove a connection. Returns it together with whether it had
    /// identified; the caller broadcasts LEAVE iff that flag is set.
    pub async fn remove(&self, id: ClientId) -> Option<(Arc<Connection>, bool)> {
        let mut inner = self.inner.lock().await;
        let conn = inner.clients.remove(&id)?;
        let was_identified = conn.is_identified();
        Some((conn, was_identified))
    }

    /// All current connections, in id order.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().await.clients.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    /// `(total, identified)` connection counts.
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        let identified = inner
            .clients
            .values()
            .filter(|c| c.is_identified())
            .count();
        (inner.clients.len(), identified)
    }
}
