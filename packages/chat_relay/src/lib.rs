//! Chat Relay - relay core between browser chat clients and a gateway
//!
//! This crate owns the interesting part of Family Chat: one shared
//! WebSocket link to the gateway process, the set of connected browsers,
//! and the translation between the two dialects. It has no HTTP server
//! dependencies; the binary feeds it browser frames and drains the
//! per-client queues it hands out.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_relay::{
//!     ClientRegistry, GatewayConfig, GatewayLink, RelayCoordinator, RelayMetrics, StubSearch,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = Arc::new(RelayMetrics::new());
//!     let (link, forwarded) = GatewayLink::new(GatewayConfig::default(), metrics.clone());
//!     let registry = Arc::new(ClientRegistry::new("Family Chat v1.0", metrics.clone()));
//!     let relay = Arc::new(RelayCoordinator::new(
//!         link.clone(),
//!         registry,
//!         Arc::new(StubSearch),
//!         metrics,
//!     ));
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(link.run(cancel.clone()));
//!     tokio::spawn(relay.clone().run(forwarded, cancel.clone()));
//!
//!     // One browser connection
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(100);
//!     let client = relay.client_connected(tx).await;
//!     relay
//!         .handle_client_text(client, r#"{"type":"chat","text":"hi","user":"Alice"}"#)
//!         .await;
//!     while let Some(json) = rx.recv().await {
//!         println!("to browser: {}", json);
//!     }
//! }
//! ```

mod coordinator;
mod error;
pub mod frames;
mod gateway;
mod metrics;
pub mod protocol;
mod registry;
pub mod search;
pub mod translate;

pub use coordinator::RelayCoordinator;
pub use error::{RelayError, Result};
pub use frames::{ClientIdentity, GatewayFrame, InboundFrame};
pub use gateway::{
    ConnectionId, DEFAULT_GATEWAY_URL, DEFAULT_RECONNECT_DELAY, GatewayConfig, GatewayLink,
    LinkState, MIN_RECONNECT_DELAY, SendOutcome,
};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use protocol::{BotMessage, ClientMessage, ServerMessage};
pub use registry::{ClientId, ClientRegistry, ClientSender};
pub use search::{MusicSearch, SearchResult, StubSearch};
