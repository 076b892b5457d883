//! The single shared connection to the gateway.
//!
//! A [`GatewayLink`] owns one outbound WebSocket at a time. Each attempt gets
//! a fresh [`ConnectionId`]; state changes and inbound frames are only
//! honoured for the current attempt, so a late message from a superseded
//! socket can't flip the link ready or disconnected.
//!
//! ```text
//! disconnected ──attempt──▶ connecting ──hello-ok──▶ ready
//!       ▲                        │                      │
//!       └──── close / error ─────┴──────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::frames::{self, ClientIdentity, Disposition, GatewayFrame, InboundFrame};
use crate::metrics::RelayMetrics;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Shortest pause between attempts, whatever the config says
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(50);

/// Capacity of the per-connection write queue
const OUTBOUND_QUEUE: usize = 100;
/// Capacity of the queue of frames waiting to be relayed to clients
const FORWARD_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    /// Bearer token for the handshake; empty means no `auth` block
    pub token: Option<String>,
    pub reconnect_delay: Duration,
    pub identity: ClientIdentity,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            identity: ClientIdentity::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Ready,
}

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Generation number of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gw-{}", self.0)
    }
}

/// Result of [`GatewayLink::send`].
///
/// Frames are never queued while the link is down; they are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The link was not ready
    DroppedNotReady,
    /// The connection's write queue was full
    DroppedBackpressure,
    /// The frame could not be serialized
    Invalid,
}

struct LinkStatus {
    current: Option<ConnectionId>,
    /// Write queue of the current connection, present once its socket is open
    outbound: Option<mpsc::Sender<String>>,
}

pub struct GatewayLink {
    config: GatewayConfig,
    status: Mutex<LinkStatus>,
    state_tx: watch::Sender<LinkState>,
    next_conn: AtomicU64,
    forward_tx: mpsc::Sender<InboundFrame>,
    metrics: Arc<RelayMetrics>,
}

impl GatewayLink {
    /// Create the link. The receiver yields every frame clients should see.
    pub fn new(
        config: GatewayConfig,
        metrics: Arc<RelayMetrics>,
    ) -> (Arc<Self>, mpsc::Receiver<InboundFrame>) {
        let (forward_tx, forward_rx) = mpsc::channel(FORWARD_QUEUE);
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let link = Arc::new(Self {
            config,
            status: Mutex::new(LinkStatus {
                current: None,
                outbound: None,
            }),
            state_tx,
            next_conn: AtomicU64::new(1),
            forward_tx,
            metrics,
        });
        (link, forward_rx)
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Write a frame to the gateway if the link is ready, otherwise drop it.
    pub async fn send(&self, frame: &GatewayFrame) -> SendOutcome {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize gateway frame: {}", e);
                return SendOutcome::Invalid;
            }
        };

        let status = self.status.lock().await;
        let outbound = match (&status.outbound, self.state()) {
            (Some(tx), LinkState::Ready) => tx,
            _ => {
                self.metrics.gateway_frame_dropped();
                debug!("Gateway not ready, dropping frame");
                return SendOutcome::DroppedNotReady;
            }
        };

        match outbound.try_send(text) {
            Ok(()) => {
                self.metrics.gateway_frame_sent();
                SendOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.gateway_frame_dropped();
                warn!("Gateway write queue full, dropping frame");
                SendOutcome::DroppedBackpressure
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.gateway_frame_dropped();
                SendOutcome::DroppedNotReady
            }
        }
    }

    /// Pause before the next attempt.
    pub fn reconnect_delay(&self) -> Duration {
        self.config.reconnect_delay.max(MIN_RECONNECT_DELAY)
    }

    async fn open_socket(&self) -> Result<GatewaySocket> {
        let (stream, _response) = connect_async(self.config.url.as_str()).await?;
        Ok(stream)
    }

    /// Keep the link connected until `cancel` fires.
    ///
    /// Every drop or failed attempt is followed by a fixed reconnect delay;
    /// retries never stop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let conn = self.begin_attempt().await;
            info!(conn = %conn, url = %self.config.url, "Connecting to gateway");

            let attempt = tokio::select! {
                _ = cancel.cancelled() => {
                    self.connection_lost(conn).await;
                    break;
                }
                result = self.open_socket() => result,
            };

            match attempt {
                Ok(stream) => {
                    self.metrics.gateway_connected();
                    match self.connection_opened(conn).await {
                        Ok(outbound) => self.drive(conn, stream, outbound, &cancel).await,
                        Err(e) => warn!(conn = %conn, "Could not start gateway session: {}", e),
                    }
                }
                Err(e) => warn!(conn = %conn, "Gateway connection failed: {}", e),
            }

            self.connection_lost(conn).await;
            if cancel.is_cancelled() {
                break;
            }

            let delay = self.reconnect_delay();
            self.metrics.gateway_reconnect_scheduled();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to gateway");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Gateway link stopped");
    }

    async fn drive(
        &self,
        conn: ConnectionId,
        stream: GatewaySocket,
        mut outbound: mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) {
        let (mut sink, mut source) = stream.split();

        let writer = async {
            while let Some(text) = outbound.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(conn = %conn, "Gateway write failed: {}", e);
                    break;
                }
            }
        };

        let reader = async {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => self.handle_inbound(conn, text.as_str()).await,
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_inbound(conn, text).await,
                        Err(_) => {
                            self.metrics.gateway_frame_malformed();
                            debug!(
                                conn = %conn,
                                len = bytes.len(),
                                "Discarding non-UTF-8 binary frame"
                            );
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!(conn = %conn, ?frame, "Gateway closed connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(conn = %conn, "Gateway read failed: {}", e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = writer => debug!(conn = %conn, "Gateway writer ended"),
            _ = reader => debug!(conn = %conn, "Gateway reader ended"),
            _ = cancel.cancelled() => debug!(conn = %conn, "Gateway link cancelled"),
        }
    }

    /// Start a new attempt, superseding whatever came before.
    pub(crate) async fn begin_attempt(&self) -> ConnectionId {
        let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let mut status = self.status.lock().await;
        status.current = Some(conn);
        status.outbound = None;
        self.state_tx.send_replace(LinkState::Connecting);
        conn
    }

    /// The socket for `conn` is open: create its write queue with the
    /// handshake already at the front.
    pub(crate) async fn connection_opened(
        &self,
        conn: ConnectionId,
    ) -> Result<mpsc::Receiver<String>> {
        let handshake = frames::connect_request(
            &self.config.identity,
            self.config.token.as_deref(),
            Utc::now().timestamp_millis(),
        )?;
        let text = serde_json::to_string(&handshake)?;

        let mut status = self.status.lock().await;
        if status.current != Some(conn) {
            return Err(RelayError::Superseded(conn));
        }
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let _ = tx.try_send(text);
        status.outbound = Some(tx);
        debug!(conn = %conn, "Handshake queued");
        Ok(rx)
    }

    pub(crate) async fn handle_inbound(&self, conn: ConnectionId, text: &str) {
        if self.status.lock().await.current != Some(conn) {
            debug!(conn = %conn, "Ignoring frame from superseded connection");
            return;
        }

        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.gateway_frame_malformed();
                warn!(conn = %conn, "Discarding malformed gateway frame: {}", e);
                return;
            }
        };
        let inbound = match InboundFrame::from_value(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.metrics.gateway_frame_malformed();
                debug!(conn = %conn, "Discarding unrecognized gateway frame: {}", e);
                return;
            }
        };

        match frames::classify(&inbound.frame) {
            Disposition::HelloOk => self.mark_ready(conn).await,
            Disposition::Forward => {
                self.metrics.gateway_frame_relayed();
                if self.forward_tx.send(inbound).await.is_err() {
                    debug!("No relay listening for gateway frames");
                }
            }
            Disposition::Drop => debug!(conn = %conn, "Dropping gateway frame"),
        }
    }

    async fn mark_ready(&self, conn: ConnectionId) {
        let status = self.status.lock().await;
        if status.current != Some(conn) || status.outbound.is_none() {
            return;
        }
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == LinkState::Ready {
                false
            } else {
                *state = LinkState::Ready;
                true
            }
        });
        if changed {
            info!(conn = %conn, "Gateway link ready");
        }
    }

    /// `conn` is gone. Only the current connection affects the state.
    pub(crate) async fn connection_lost(&self, conn: ConnectionId) {
        let mut status = self.status.lock().await;
        if status.current != Some(conn) {
            return;
        }
        status.current = None;
        status.outbound = None;
        if self.state_tx.send_replace(LinkState::Disconnected) == LinkState::Ready {
            info!(conn = %conn, "Gateway link lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate;
    use serde_json::json;

    fn link() -> (Arc<GatewayLink>, mpsc::Receiver<InboundFrame>) {
        GatewayLink::new(GatewayConfig::default(), Arc::new(RelayMetrics::new()))
    }

    async fn open(link: &GatewayLink) -> (ConnectionId, mpsc::Receiver<String>) {
        let conn = link.begin_attempt().await;
        let rx = link.connection_opened(conn).await.unwrap();
        (conn, rx)
    }

    fn hello_ok() -> String {
        json!({
            "type": "res",
            "id": "connect-1",
            "ok": true,
            "payload": {"type": "hello-ok", "protocol": 2}
        })
        .to_string()
    }

    fn written(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    // ── state machine ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_starts_disconnected() {
        let (link, _fwd) = link();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.is_ready());
    }

    #[tokio::test]
    async fn test_socket_open_is_not_ready() {
        let (link, _fwd) = link();
        let (_conn, mut rx) = open(&link).await;
        assert_eq!(link.state(), LinkState::Connecting);

        let frames = written(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "connect");
    }

    #[tokio::test]
    async fn test_hello_ok_makes_ready() {
        let (link, _fwd) = link();
        let (conn, _rx) = open(&link).await;
        link.handle_inbound(conn, &hello_ok()).await;
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_other_ok_responses_do_not_make_ready() {
        let (link, _fwd) = link();
        let (conn, _rx) = open(&link).await;
        for frame in [
            json!({"type": "res", "id": "1", "ok": true, "payload": {"type": "welcome"}}),
            json!({"type": "res", "id": "1", "ok": false, "payload": {"type": "hello-ok"}}),
            json!({"type": "event", "event": "hello-ok", "payload": {"type": "hello-ok"}}),
        ] {
            link.handle_inbound(conn, &frame.to_string()).await;
        }
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn test_connection_lost_from_ready() {
        let (link, _fwd) = link();
        let (conn, _rx) = open(&link).await;
        link.handle_inbound(conn, &hello_ok()).await;

        link.connection_lost(conn).await;
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_state_subscription_sees_transitions() {
        let (link, _fwd) = link();
        let mut state_rx = link.subscribe_state();
        let (conn, _rx) = open(&link).await;
        assert_eq!(*state_rx.borrow_and_update(), LinkState::Connecting);

        link.handle_inbound(conn, &hello_ok()).await;
        assert!(state_rx.has_changed().unwrap());
        assert_eq!(*state_rx.borrow_and_update(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_reconnect_delay_has_a_floor() {
        let metrics = Arc::new(RelayMetrics::new());
        let config = GatewayConfig {
            reconnect_delay: Duration::ZERO,
            ..Default::default()
        };
        let (fast, _fwd) = GatewayLink::new(config, metrics.clone());
        assert_eq!(fast.reconnect_delay(), MIN_RECONNECT_DELAY);

        let (default, _fwd) = link();
        assert_eq!(default.reconnect_delay(), DEFAULT_RECONNECT_DELAY);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let config = GatewayConfig {
            url,
            ..Default::default()
        };
        let (link, _fwd) = GatewayLink::new(config, Arc::new(RelayMetrics::new()));
        assert!(matches!(
            link.open_socket().await,
            Err(RelayError::Transport(_))
        ));
    }

    // ── superseded connections ──────────────────────────────────────────

    #[tokio::test]
    async fn test_stale_hello_ok_is_ignored() {
        let (link, _fwd) = link();
        let (old, _old_rx) = open(&link).await;
        let (_new, _new_rx) = open(&link).await;

        link.handle_inbound(old, &hello_ok()).await;
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let (link, _fwd) = link();
        let (old, _old_rx) = open(&link).await;
        let (new, _new_rx) = open(&link).await;
        link.handle_inbound(new, &hello_ok()).await;

        link.connection_lost(old).await;
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_superseded_attempt_cannot_open() {
        let (link, _fwd) = link();
        let old = link.begin_attempt().await;
        let _new = link.begin_attempt().await;
        let result = link.connection_opened(old).await;
        assert!(matches!(result, Err(RelayError::Superseded(id)) if id == old));
    }

    // ── drop-if-not-ready ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (link, _fwd) = link();
        let outcome = link.send(&translate::chat_request("hi")).await;
        assert_eq!(outcome, SendOutcome::DroppedNotReady);
        assert_eq!(link.metrics.gateway_frames_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_send_while_connecting_writes_nothing() {
        let (link, _fwd) = link();
        let (_conn, mut rx) = open(&link).await;
        written(&mut rx); // handshake

        let outcome = link.send(&translate::chat_request("hi")).await;
        assert_eq!(outcome, SendOutcome::DroppedNotReady);
        assert!(written(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_when_ready_is_written() {
        let (link, _fwd) = link();
        let (conn, mut rx) = open(&link).await;
        link.handle_inbound(conn, &hello_ok()).await;
        written(&mut rx);

        let outcome = link.send(&translate::chat_request("hi")).await;
        assert_eq!(outcome, SendOutcome::Sent);

        let frames = written(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "req");
        assert_eq!(frames[0]["method"], "message");
        assert_eq!(frames[0]["params"]["channel"], "webchat");
        assert_eq!(frames[0]["params"]["message"], "hi");
    }

    #[tokio::test]
    async fn test_send_after_loss_is_dropped() {
        let (link, _fwd) = link();
        let (conn, _rx) = open(&link).await;
        link.handle_inbound(conn, &hello_ok()).await;
        link.connection_lost(conn).await;

        let outcome = link.send(&translate::chat_request("hi")).await;
        assert_eq!(outcome, SendOutcome::DroppedNotReady);
    }

    // ── inbound dispatch ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_malformed_frame_then_valid_frame() {
        let (link, mut fwd) = link();
        let (conn, _rx) = open(&link).await;

        link.handle_inbound(conn, "{not json").await;
        link.handle_inbound(conn, r#"{"type":"mystery"}"#).await;
        let event = json!({"type": "event", "event": "message", "payload": {"message": "hello"}});
        link.handle_inbound(conn, &event.to_string()).await;

        let forwarded = fwd.try_recv().unwrap();
        assert_eq!(forwarded.raw, event);
        assert!(fwd.try_recv().is_err());
        assert_eq!(link.metrics.gateway_frames_malformed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_only_events_and_method_responses_are_forwarded() {
        let (link, mut fwd) = link();
        let (conn, _rx) = open(&link).await;

        let frames = [
            json!({"type": "res", "id": "1", "ok": true, "payload": {}}),
            json!({"type": "res", "id": "2", "ok": false, "method": "message"}),
            json!({"type": "req", "id": "3", "method": "ping"}),
            json!({"type": "event", "event": "presence", "payload": {}}),
        ];
        for frame in &frames {
            link.handle_inbound(conn, &frame.to_string()).await;
        }

        assert_eq!(fwd.try_recv().unwrap().raw, frames[1]);
        assert_eq!(fwd.try_recv().unwrap().raw, frames[3]);
        assert!(fwd.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hello_ok_is_not_forwarded() {
        let (link, mut fwd) = link();
        let (conn, _rx) = open(&link).await;
        link.handle_inbound(conn, &hello_ok()).await;
        assert!(fwd.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_from_stale_connection_not_forwarded() {
        let (link, mut fwd) = link();
        let (old, _old_rx) = open(&link).await;
        let (_new, _new_rx) = open(&link).await;
        let event = json!({"type": "event", "event": "message", "payload": {}});
        link.handle_inbound(old, &event.to_string()).await;
        assert!(fwd.try_recv().is_err());
    }
}
