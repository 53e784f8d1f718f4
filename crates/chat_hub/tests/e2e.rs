//! Socket-level end-to-end tests for the broadcast hub.

use std::net::SocketAddr;
use std::sync::Arc;

use chat_hub::{create_router, AppState, ClientRegistry, Dispatcher, Envelope, HubConfig};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bind a hub on an ephemeral port and serve it in the background. The
/// returned sender keeps the dispatcher's shutdown channel open for the
/// test's duration.
async fn start_hub(config: HubConfig) -> (SocketAddr, mpsc::Sender<()>) {
    let registry = Arc::new(ClientRegistry::new());
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let dispatcher = Dispatcher::new(registry.clone(), inbound_rx, shutdown_rx, &config);
    tokio::spawn(dispatcher.run());

    let state = Arc::new(AppState {
        registry,
        inbound_tx,
        config,
    });
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, shutdown_tx)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

/// Read frames until the next text frame, parsed as an envelope.
async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    loop {
        match ws.next().await.expect("stream ended").expect("read failed") {
            Message::Text(text) => return Envelope::from_json(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_broadcast_reaches_all_but_sender() {
    let (addr, _shutdown_tx) = start_hub(HubConfig::default()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;

    // Registration happens server-side after the upgrade; c's warmup
    // reaching a and b proves all three are registered before the real
    // scenario starts.
    c.send(Message::text("warmup")).await.unwrap();
    let warmup_sender = recv_envelope(&mut a).await.sender;
    assert_eq!(recv_envelope(&mut b).await.sender, warmup_sender);

    a.send(Message::text("hello")).await.unwrap();
    let b_envelope = recv_envelope(&mut b).await;
    let c_envelope = recv_envelope(&mut c).await;
    assert_eq!(b_envelope.content, "hello");
    assert_eq!(c_envelope.content, "hello");
    assert_eq!(b_envelope.sender, c_envelope.sender);
    assert_ne!(b_envelope.sender, warmup_sender);

    // Per-client delivery follows dispatch order, so if "hello" had been
    // echoed to a it would arrive ahead of b's marker.
    b.send(Message::text("marker")).await.unwrap();
    assert_eq!(recv_envelope(&mut a).await.content, "marker");
}

#[tokio::test]
async fn test_echo_variant_includes_sender() {
    let config = HubConfig {
        echo_to_sender: true,
        ..Default::default()
    };
    let (addr, _shutdown_tx) = start_hub(config).await;

    let mut a = connect(addr).await;
    // With echo on, a client's own message coming back proves it is
    // registered.
    a.send(Message::text("warmup")).await.unwrap();
    assert_eq!(recv_envelope(&mut a).await.content, "warmup");

    let mut b = connect(addr).await;
    b.send(Message::text("warmup2")).await.unwrap();
    assert_eq!(recv_envelope(&mut b).await.content, "warmup2");
    assert_eq!(recv_envelope(&mut a).await.content, "warmup2");

    a.send(Message::text("hello")).await.unwrap();
    let a_envelope = recv_envelope(&mut a).await;
    let b_envelope = recv_envelope(&mut b).await;
    assert_eq!(a_envelope.content, "hello");
    assert_eq!(b_envelope.content, "hello");
    assert_eq!(a_envelope.sender, b_envelope.sender);
}

#[tokio::test]
async fn test_slow_client_evicted_without_stalling_broadcast() {
    let config = HubConfig {
        outbound_capacity: 32,
        ..Default::default()
    };
    let (addr, _shutdown_tx) = start_hub(config).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;

    c.send(Message::text("warmup")).await.unwrap();
    assert_eq!(recv_envelope(&mut a).await.content, "warmup");
    assert_eq!(recv_envelope(&mut b).await.content, "warmup");

    // c drains concurrently; b never reads, so once its socket buffers
    // and its bounded outbound queue fill up, the dispatcher evicts it
    // mid-run without stalling delivery to c.
    let reader = tokio::spawn(async move {
        let mut contents = Vec::new();
        loop {
            let envelope = recv_envelope(&mut c).await;
            let done = envelope.content == "final";
            contents.push(envelope.content);
            if done {
                return contents;
            }
        }
    });

    let big = "x".repeat(1024 * 1024);
    for _ in 0..64 {
        a.send(Message::text(big.clone())).await.unwrap();
    }
    a.send(Message::text("final")).await.unwrap();

    // c saw every message despite b being stalled the whole time.
    let contents = reader.await.unwrap();
    assert_eq!(contents.len(), 65);

    // b got at most what was queued before eviction; the hub closes its
    // socket once that backlog drains, and "final" is never part of it.
    let mut b_contents = Vec::new();
    while let Some(frame) = b.next().await {
        let Ok(frame) = frame else { break };
        if let Message::Text(text) = frame {
            b_contents.push(Envelope::from_json(&text).unwrap().content);
        }
    }
    assert!(!b_contents.iter().any(|content| content == "final"));
    assert!(b_contents.len() < 65);
}
