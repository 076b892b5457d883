//! Routing between browser clients, the gateway link and music search.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frames::InboundFrame;
use crate::gateway::{GatewayLink, SendOutcome};
use crate::metrics::RelayMetrics;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::registry::{ClientId, ClientRegistry, ClientSender};
use crate::search::MusicSearch;
use crate::translate;

pub struct RelayCoordinator {
    link: Arc<GatewayLink>,
    registry: Arc<ClientRegistry>,
    search: Arc<dyn MusicSearch>,
    metrics: Arc<RelayMetrics>,
}

impl RelayCoordinator {
    pub fn new(
        link: Arc<GatewayLink>,
        registry: Arc<ClientRegistry>,
        search: Arc<dyn MusicSearch>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            link,
            registry,
            search,
            metrics,
        }
    }

    pub fn link(&self) -> &Arc<GatewayLink> {
        &self.link
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub async fn client_connected(&self, tx: ClientSender) -> ClientId {
        self.registry.register(tx, self.link.is_ready()).await
    }

    pub async fn client_disconnected(&self, id: ClientId) {
        self.registry.unregister(id).await;
    }

    /// Handle one text frame from a browser. Bad input is logged and dropped.
    pub async fn handle_client_text(&self, from: ClientId, text: &str) {
        self.metrics.client_message_received();
        match protocol::parse_client_message(text) {
            Ok(msg) => self.handle_client_message(from, msg).await,
            Err(e) => {
                self.metrics.client_message_malformed();
                warn!(client_id = %from, "Ignoring malformed client message: {}", e);
            }
        }
    }

    pub async fn handle_client_message(&self, from: ClientId, msg: ClientMessage) {
        match msg {
            ClientMessage::Chat { text, user } => {
                debug!(client_id = %from, user = user.as_deref().unwrap_or("anonymous"), "Chat message");
                let outcome = self.link.send(&translate::chat_request(&text)).await;
                if outcome != SendOutcome::Sent {
                    info!(client_id = %from, ?outcome, "Chat message not delivered to gateway");
                }
            }
            ClientMessage::MusicSearch { query } => {
                self.metrics.search_requested();
                debug!(client_id = %from, query = %query, "Music search");
                let search = self.search.clone();
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    let results = search.search(&query).await;
                    registry
                        .send_to(from, &ServerMessage::MusicResults { data: results })
                        .await;
                });
            }
            ClientMessage::Unknown => {
                debug!(client_id = %from, "Ignoring unknown client message type");
            }
        }
    }

    /// Broadcast one forwarded gateway frame. Returns the number of recipients.
    pub async fn relay_gateway_frame(&self, inbound: InboundFrame) -> usize {
        let msg = translate::relay_message(inbound);
        self.registry.broadcast(&msg).await
    }

    /// Relay everything the gateway link forwards until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundFrame>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(frame) => {
                        let delivered = self.relay_gateway_frame(frame).await;
                        debug!(delivered, "Relayed gateway frame");
                    }
                    None => break,
                },
            }
        }
        info!("Relay coordinator stopped");
    }
}
