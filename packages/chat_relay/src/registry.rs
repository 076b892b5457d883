//! Membership of connected browser clients and fan-out to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};

use crate::metrics::RelayMetrics;
use crate::protocol::{InitData, ServerMessage};

/// Registry-assigned identity of a browser connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outbound queue of one client. Items are serialized `ServerMessage`s.
pub type ClientSender = mpsc::Sender<Arc<str>>;

pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientSender>>,
    next_id: AtomicU64,
    server_name: String,
    metrics: Arc<RelayMetrics>,
}

impl ClientRegistry {
    pub fn new(server_name: impl Into<String>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            server_name: server_name.into(),
            metrics,
        }
    }

    /// Add a client and immediately send it `init` with the gateway status.
    pub async fn register(&self, tx: ClientSender, gateway_ready: bool) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let init = ServerMessage::Init {
            data: InitData {
                connected: gateway_ready,
                server: self.server_name.clone(),
            },
        };
        if let Some(payload) = encode(&init) {
            self.deliver(id, &tx, payload);
        }
        self.clients.write().await.insert(id, tx);
        self.metrics.client_connected();
        debug!(client_id = %id, "Client registered");
        id
    }

    /// Remove a client. Returns whether it was still registered.
    pub async fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id).is_some();
        if removed {
            self.metrics.client_disconnected();
            debug!(client_id = %id, "Client unregistered");
        }
        removed
    }

    /// Send to every open client. Returns the number of clients that got it.
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        let Some(payload) = encode(msg) else {
            return 0;
        };
        let clients = self.clients.read().await;
        let mut delivered = 0;
        for (id, tx) in clients.iter() {
            if self.deliver(*id, tx, payload.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send to one client. A missing or closed client is a no-op.
    pub async fn send_to(&self, id: ClientId, msg: &ServerMessage) -> bool {
        let Some(payload) = encode(msg) else {
            return false;
        };
        match self.clients.read().await.get(&id) {
            Some(tx) => self.deliver(id, tx, payload),
            None => {
                debug!(client_id = %id, "Client gone before message could be sent");
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    fn deliver(&self, id: ClientId, tx: &ClientSender, payload: Arc<str>) -> bool {
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.client_message_dropped();
                warn!(client_id = %id, "Client queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn registry() -> ClientRegistry {
        ClientRegistry::new("Family Chat v1.0", Arc::new(RelayMetrics::new()))
    }

    fn next_json(rx: &mut mpsc::Receiver<Arc<str>>) -> Option<Value> {
        rx.try_recv()
            .ok()
            .map(|s| serde_json::from_str(&s).unwrap())
    }

    fn event(n: u64) -> ServerMessage {
        ServerMessage::Gateway {
            data: json!({"type": "event", "event": "tick", "payload": {"n": n}}),
            bot: None,
        }
    }

    #[tokio::test]
    async fn test_register_sends_init() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(8);
        reg.register(tx, true).await;

        let init = next_json(&mut rx).unwrap();
        assert_eq!(
            init,
            json!({"type": "init", "data": {"connected": true, "server": "Family Chat v1.0"}})
        );
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_reports_gateway_down() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(8);
        reg.register(tx, false).await;
        assert_eq!(next_json(&mut rx).unwrap()["data"]["connected"], false);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let reg = registry();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let a = reg.register(tx1, false).await;
        let b = reg.register(tx2, false).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(8);
        let id = reg.register(tx, false).await;

        assert!(reg.unregister(id).await);
        assert!(!reg.unregister(id).await);
        assert!(reg.is_empty().await);
        assert_eq!(reg.metrics.active_clients.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_exactly_registered_clients() {
        let reg = registry();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let (tx, mut rx) = mpsc::channel(8);
            ids.push(reg.register(tx, false).await);
            next_json(&mut rx); // init
            receivers.push(rx);
        }

        reg.unregister(ids[1]).await;
        reg.unregister(ids[3]).await;

        let delivered = reg.broadcast(&event(1)).await;
        assert_eq!(delivered, 2);

        let got: Vec<bool> = receivers
            .iter_mut()
            .map(|rx| next_json(rx).is_some())
            .collect();
        assert_eq!(got, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_clients() {
        let reg = registry();
        let (tx_open, mut rx_open) = mpsc::channel(8);
        let (tx_closed, rx_closed) = mpsc::channel(8);
        reg.register(tx_open, false).await;
        reg.register(tx_closed, false).await;
        drop(rx_closed);
        next_json(&mut rx_open);

        assert_eq!(reg.broadcast(&event(1)).await, 1);
        assert_eq!(next_json(&mut rx_open).unwrap()["data"]["payload"]["n"], 1);
    }

    #[tokio::test]
    async fn test_broadcast_full_queue_drops_only_for_that_client() {
        let reg = registry();
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = mpsc::channel(8);
        reg.register(tx_slow, false).await; // init fills the slow queue
        reg.register(tx_fast, false).await;
        next_json(&mut rx_fast);

        assert_eq!(reg.broadcast(&event(7)).await, 1);
        assert_eq!(next_json(&mut rx_fast).unwrap()["data"]["payload"]["n"], 7);
        assert_eq!(next_json(&mut rx_slow).unwrap()["type"], "init");
        assert!(next_json(&mut rx_slow).is_none());
        assert_eq!(reg.metrics.client_messages_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_send_to_is_unicast() {
        let reg = registry();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = reg.register(tx_a, false).await;
        reg.register(tx_b, false).await;
        next_json(&mut rx_a);
        next_json(&mut rx_b);

        assert!(reg.send_to(a, &ServerMessage::MusicResults { data: vec![] }).await);
        assert_eq!(next_json(&mut rx_a).unwrap()["type"], "music-results");
        assert!(next_json(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn test_send_to_missing_client() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(8);
        let id = reg.register(tx, false).await;
        reg.unregister(id).await;
        assert!(!reg.send_to(id, &event(1)).await);
    }
}
