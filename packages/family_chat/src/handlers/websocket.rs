use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chat_relay::RelayCoordinator;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AppState;

/// Browser chat WebSocket
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let relay = state.relay.clone();
    let queue = state.client_queue;
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_client(socket, relay, queue, shutdown))
}

async fn handle_client(
    socket: WebSocket,
    relay: Arc<RelayCoordinator>,
    queue: usize,
    shutdown: CancellationToken,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create a channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel(queue.max(1));
    let client_id = relay.client_connected(tx).await;
    info!(client_id = %client_id, "Browser connected");

    // Task to send messages from channel to WebSocket
    let sender_task = async move {
        while let Some(json) = rx.recv().await {
            if ws_sender
                .send(Message::Text(json.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    };

    // Task to forward WebSocket input to the relay
    let relay_input = relay.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    relay_input
                        .handle_client_text(client_id, text.as_str())
                        .await;
                }
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => relay_input.handle_client_text(client_id, text).await,
                    Err(_) => debug!(client_id = %client_id, "Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!(client_id = %client_id, "Client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(client_id = %client_id, "WebSocket error from client: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(client_id = %client_id, "Sender task ended"),
        _ = input_task => debug!(client_id = %client_id, "Input task ended"),
        _ = shutdown.cancelled() => debug!(client_id = %client_id, "Server shutting down"),
    }

    relay.client_disconnected(client_id).await;
    info!(client_id = %client_id, "Browser disconnected");
}
