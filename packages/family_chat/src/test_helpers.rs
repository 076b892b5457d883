use std::sync::Arc;
use std::time::Duration;

use chat_relay::{
    ClientRegistry, GatewayConfig, GatewayLink, LinkState, MusicSearch, RelayCoordinator,
    RelayMetrics, StubSearch,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use crate::AppState;

pub struct TestApp {
    pub state: AppState,
    pub link: Arc<GatewayLink>,
    pub cancel: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build an `AppState` whose gateway link is not running, so it stays
/// disconnected for the whole test.
pub fn test_app(search: Arc<dyn MusicSearch>) -> TestApp {
    build(GatewayConfig::default(), search)
}

pub fn test_app_with_stub() -> TestApp {
    test_app(Arc::new(StubSearch))
}

fn build(gateway: GatewayConfig, search: Arc<dyn MusicSearch>) -> TestApp {
    let metrics = Arc::new(RelayMetrics::new());
    let (link, forwarded) = GatewayLink::new(gateway, metrics.clone());
    let registry = Arc::new(ClientRegistry::new("Family Chat v1.0", metrics.clone()));
    let relay = Arc::new(RelayCoordinator::new(
        link.clone(),
        registry,
        search.clone(),
        metrics,
    ));
    let cancel = CancellationToken::new();
    tokio::spawn(relay.clone().run(forwarded, cancel.clone()));

    TestApp {
        state: AppState {
            relay,
            search,
            client_queue: 32,
            shutdown: cancel.clone(),
        },
        link,
        cancel,
    }
}

/// Like `test_app_with_stub`, but connected to a fake gateway that has
/// completed the handshake. The returned socket is the gateway's side.
pub async fn test_app_with_gateway() -> (TestApp, WebSocketStream<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let gateway = GatewayConfig {
        url: format!("ws://{}", listener.local_addr().expect("addr")),
        reconnect_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let app = build(gateway, Arc::new(StubSearch));
    tokio::spawn(app.link.clone().run(app.cancel.clone()));

    let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("relay never connected")
        .expect("accept");
    let mut ws = accept_async(tcp).await.expect("handshake");

    let first = ws.next().await.expect("handshake frame").expect("read");
    assert!(matches!(first, Message::Text(_)));
    let hello = json!({"type": "res", "id": "connect", "ok": true, "payload": {"type": "hello-ok"}});
    ws.send(Message::Text(hello.to_string().into()))
        .await
        .expect("send hello-ok");

    let mut state_rx = app.link.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state_rx.wait_for(|s| *s == LinkState::Ready),
    )
    .await
    .expect("link never became ready")
    .expect("link dropped");

    (app, ws)
}
