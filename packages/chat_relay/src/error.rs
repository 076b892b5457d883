use thiserror::Error;

use crate::gateway::ConnectionId;

/// Errors raised inside the relay core.
///
/// Operations that the relay treats as best-effort (sending to the gateway,
/// broadcasting, searching) report outcomes instead of returning these.
#[derive(Debug, Error)]
pub enum RelayError {
    /// WebSocket transport failure on the gateway link
    #[error("Gateway transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// A frame could not be encoded or decoded
    #[error("Invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
    /// The connection was replaced before it finished opening
    #[error("Connection {0} was superseded")]
    Superseded(ConnectionId),
}

pub type Result<T> = std::result::Result<T, RelayError>;
