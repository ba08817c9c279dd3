use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use parity_core::ConnectionHandle;
use tokio::sync::mpsc;

/// A frame queued for one connection's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(Arc<str>),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

/// One accepted connection as the broker sees it.
#[derive(Clone, Debug)]
pub struct Connection {
    pub handle: ConnectionHandle,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(handle: ConnectionHandle, tx: mpsc::Sender<Outbound>) -> Self {
        Self { handle, tx }
    }

    /// Queue a frame for this connection. Returns `false` once the writer is gone.
    pub async fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.tx.clone()
    }
}

struct RegisteredClient {
    name: String,
    tx: mpsc::Sender<Outbound>,
}

/// Registry of authenticated connections.
///
/// Every operation takes the lock once and never across an `.await`, so
/// register, unregister and the broadcast-target snapshot are atomic with
/// respect to each other.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ConnectionHandle, RegisteredClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `name`. A connection holds at most one identity, so a
    /// repeated connect replaces the previous name, which is returned.
    pub fn register(
        &self,
        handle: ConnectionHandle,
        name: impl Into<String>,
        tx: mpsc::Sender<Outbound>,
    ) -> Option<String> {
        let name = name.into();
        tracing::info!(%handle, client = %name, "client connected");
        self.clients
            .write()
            .insert(handle, RegisteredClient { name, tx })
            .map(|previous| previous.name)
    }

    /// Remove a connection. Idempotent; only the first call logs and returns the name.
    pub fn unregister(&self, handle: ConnectionHandle) -> Option<String> {
        let removed = self.clients.write().remove(&handle).map(|c| c.name);
        if let Some(name) = &removed {
            tracing::info!(%handle, client = %name, "client disconnected");
        }
        removed
    }

    /// Deduplicated, lexicographically sorted client names.
    pub fn client_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .clients
            .read()
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.into_iter().collect()
    }

    /// Snapshot of every registered connection except `exclude`.
    pub fn broadcast_targets(
        &self,
        exclude: ConnectionHandle,
    ) -> Vec<(ConnectionHandle, mpsc::Sender<Outbound>)> {
        self.clients
            .read()
            .iter()
            .filter(|(handle, _)| **handle != exclude)
            .map(|(handle, c)| (*handle, c.tx.clone()))
            .collect()
    }

    pub fn name_of(&self, handle: ConnectionHandle) -> Option<String> {
        self.clients.read().get(&handle).map(|c| c.name.clone())
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.clients.read().contains_key(&handle)
    }

    /// Number of registered connections (not distinct names).
    pub fn count(&self) -> usize {
        self.clients.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u64) -> ConnectionHandle {
        ConnectionHandle::from_raw(n)
    }

    fn sender() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        assert_eq!(registry.register(h(1), "alpha", tx.clone()), None);
        assert!(registry.contains(h(1)));
        assert_eq!(registry.count(), 1);

        assert_eq!(registry.unregister(h(1)).as_deref(), Some("alpha"));
        assert!(!registry.contains(h(1)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        let _ = registry.register(h(1), "alpha", tx);
        assert!(registry.unregister(h(1)).is_some());
        assert!(registry.unregister(h(1)).is_none());
        assert!(registry.unregister(h(42)).is_none());
    }

    #[test]
    fn reconnect_replaces_identity() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        let _ = registry.register(h(1), "first", tx.clone());
        let previous = registry.register(h(1), "second", tx);
        assert_eq!(previous.as_deref(), Some("first"));
        assert_eq!(registry.name_of(h(1)).as_deref(), Some("second"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn client_names_sorted_and_deduplicated() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        let _ = registry.register(h(1), "zeta", tx.clone());
        let _ = registry.register(h(2), "alpha", tx.clone());
        let _ = registry.register(h(3), "zeta", tx);
        assert_eq!(registry.client_names(), vec!["alpha", "zeta"]);
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn broadcast_targets_exclude_sender() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        for n in 1..=3 {
            let _ = registry.register(h(n), format!("c{n}"), tx.clone());
        }
        let mut targets: Vec<_> = registry
            .broadcast_targets(h(2))
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        targets.sort();
        assert_eq!(targets, vec![h(1), h(3)]);
    }

    #[test]
    fn unregistered_sender_still_reaches_everyone() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = sender();
        let _ = registry.register(h(1), "a", tx.clone());
        let _ = registry.register(h(2), "b", tx);
        assert_eq!(registry.broadcast_targets(h(99)).len(), 2);
    }

    #[tokio::test]
    async fn connection_send_fails_after_writer_drops() {
        let (tx, rx) = sender();
        let conn = Connection::new(h(1), tx);
        assert!(conn.send(Outbound::Text(Arc::from("x"))).await);
        drop(rx);
        assert!(!conn.send(Outbound::Text(Arc::from("y"))).await);
    }
}
