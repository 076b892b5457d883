//! Relay metrics for observability

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay-wide counters
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Client connection metrics
    /// Currently registered browser clients
    pub active_clients: AtomicU64,
    /// Clients registered since start
    pub total_clients: AtomicU64,

    // Client message metrics
    /// Text frames received from browsers
    pub client_messages_received: AtomicU64,
    /// Browser frames that were not valid JSON or missed required fields
    pub client_messages_malformed: AtomicU64,
    /// Messages not delivered because a client's outbound queue was full
    pub client_messages_dropped: AtomicU64,

    // Gateway metrics
    /// Requests written to the gateway
    pub gateway_frames_sent: AtomicU64,
    /// Requests dropped because the link was not ready
    pub gateway_frames_dropped: AtomicU64,
    /// Gateway frames relayed to clients
    pub gateway_frames_relayed: AtomicU64,
    /// Gateway frames that failed to decode
    pub gateway_frames_malformed: AtomicU64,
    /// Successful socket opens
    pub gateway_connects: AtomicU64,
    /// Reconnects scheduled after a drop or failed attempt
    pub gateway_reconnects: AtomicU64,

    /// Music searches started
    pub search_requests: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
        self.total_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn client_message_received(&self) {
        self.client_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_message_malformed(&self) {
        self.client_messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_message_dropped(&self) {
        self.client_messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_frame_sent(&self) {
        self.gateway_frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_frame_dropped(&self) {
        self.gateway_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_frame_relayed(&self) {
        self.gateway_frames_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_frame_malformed(&self) {
        self.gateway_frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_connected(&self) {
        self.gateway_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_reconnect_scheduled(&self) {
        self.gateway_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn search_requested(&self) {
        self.search_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            clients: ClientMetrics {
                active: self.active_clients.load(Ordering::Relaxed),
                total: self.total_clients.load(Ordering::Relaxed),
                messages_received: self.client_messages_received.load(Ordering::Relaxed),
                messages_malformed: self.client_messages_malformed.load(Ordering::Relaxed),
                messages_dropped: self.client_messages_dropped.load(Ordering::Relaxed),
            },
            gateway: GatewayMetrics {
                frames_sent: self.gateway_frames_sent.load(Ordering::Relaxed),
                frames_dropped: self.gateway_frames_dropped.load(Ordering::Relaxed),
                frames_relayed: self.gateway_frames_relayed.load(Ordering::Relaxed),
                frames_malformed: self.gateway_frames_malformed.load(Ordering::Relaxed),
                connects: self.gateway_connects.load(Ordering::Relaxed),
                reconnects: self.gateway_reconnects.load(Ordering::Relaxed),
            },
            search_requests: self.search_requests.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub clients: ClientMetrics,
    pub gateway: GatewayMetrics,
    pub search_requests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetrics {
    pub active: u64,
    pub total: u64,
    pub messages_received: u64,
    pub messages_malformed: u64,
    pub messages_dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMetrics {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_relayed: u64,
    pub frames_malformed: u64,
    pub connects: u64,
    pub reconnects: u64,
}
