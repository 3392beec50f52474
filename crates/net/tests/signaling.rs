//! End-to-end tests against a real server using WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_core::{Broker, PeerStatus};
use parley_net::{Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn local_config() -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    }
}

async fn boot_server() -> Server {
    Server::start(&local_config(), Broker::new()).await.unwrap()
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> String {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timed out") {
            Some(Ok(Message::Text(text))) => return text.to_string(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text, got {:?}", other),
        }
    }
}

async fn recv_close(ws: &mut WsStream) -> Option<CloseFrame> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timed out") {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected close, got {:?}", other),
        }
    }
}

async fn hello(addr: SocketAddr, id: &str) -> WsStream {
    let mut ws = connect(addr).await;
    send(&mut ws, &format!("HELLO {}", id)).await;
    assert_eq!(recv(&mut ws).await, "HELLO");
    ws
}

async fn wait_for_peers(broker: &Broker, count: usize) {
    timeout(TIMEOUT, async {
        while broker.peer_count().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer count never settled");
}

#[tokio::test]
async fn test_session_exchange() {
    let server = boot_server().await;
    let mut alice = hello(server.addr(), "alice").await;
    let mut bob = hello(server.addr(), "bob").await;

    send(&mut alice, "SESSION bob").await;
    assert_eq!(recv(&mut alice).await, "SESSION_OK");

    let offer = r#"{"sdp":{"type":"offer","sdp":"v=0\r\n"}}"#;
    send(&mut alice, offer).await;
    assert_eq!(recv(&mut bob).await, offer);

    let answer = r#"{"sdp":{"type":"answer","sdp":"v=0\r\n"}}"#;
    send(&mut bob, answer).await;
    assert_eq!(recv(&mut alice).await, answer);

    // Payloads arrive in send order
    for i in 0..10 {
        send(&mut alice, &format!(r#"{{"ice":{{"candidate":"c{}"}}}}"#, i)).await;
    }
    for i in 0..10 {
        assert_eq!(
            recv(&mut bob).await,
            format!(r#"{{"ice":{{"candidate":"c{}"}}}}"#, i)
        );
    }

    server.shutdown();
}

#[tokio::test]
async fn test_session_errors() {
    let server = boot_server().await;
    let mut alice = hello(server.addr(), "alice").await;
    let mut bob = hello(server.addr(), "bob").await;
    let mut carol = hello(server.addr(), "carol").await;

    send(&mut alice, "SESSION dave").await;
    assert_eq!(recv(&mut alice).await, "ERROR: peer 'dave' not found");

    send(&mut alice, "SESSION bob").await;
    assert_eq!(recv(&mut alice).await, "SESSION_OK");

    send(&mut carol, "SESSION bob").await;
    assert_eq!(recv(&mut carol).await, "ERROR: peer 'bob' busy");

    send(&mut bob, "SESSION carol").await;
    assert_eq!(recv(&mut bob).await, "ERROR: you are already in a session or room");

    server.shutdown();
}

#[tokio::test]
async fn test_partner_disconnect_ends_session() {
    let server = boot_server().await;
    let broker = server.broker().clone();
    let mut alice = hello(server.addr(), "alice").await;
    let mut bob = hello(server.addr(), "bob").await;

    send(&mut alice, "SESSION bob").await;
    assert_eq!(recv(&mut alice).await, "SESSION_OK");

    bob.close(None).await.unwrap();
    assert_eq!(recv(&mut alice).await, "ERROR: Session ended");
    wait_for_peers(&broker, 1).await;
    assert_eq!(broker.status("alice").await, Some(PeerStatus::Idle));

    // The survivor stays connected and can be reached again
    let _bob = hello(server.addr(), "bob").await;
    send(&mut alice, "SESSION bob").await;
    assert_eq!(recv(&mut alice).await, "SESSION_OK");

    server.shutdown();
}

#[tokio::test]
async fn test_room_exchange() {
    let server = boot_server().await;
    let mut alice = hello(server.addr(), "alice").await;
    let mut bob = hello(server.addr(), "bob").await;
    let mut carol = hello(server.addr(), "carol").await;

    send(&mut alice, "ROOM r1").await;
    assert_eq!(recv(&mut alice).await, "ROOM_OK");

    send(&mut bob, "ROOM r1").await;
    assert_eq!(recv(&mut bob).await, "ROOM_OK alice");
    assert_eq!(recv(&mut alice).await, "ROOM_PEER_JOINED bob");

    send(&mut carol, "ROOM r1").await;
    assert_eq!(recv(&mut carol).await, "ROOM_OK alice bob");
    assert_eq!(recv(&mut alice).await, "ROOM_PEER_JOINED carol");
    assert_eq!(recv(&mut bob).await, "ROOM_PEER_JOINED carol");

    // Broadcast reaches everyone but the sender
    send(&mut bob, "hello room").await;
    assert_eq!(recv(&mut alice).await, "hello room");
    assert_eq!(recv(&mut carol).await, "hello room");

    // Targeted message carries its origin
    send(&mut carol, r#"ROOM_PEER_MSG alice {"sdp":{}}"#).await;
    assert_eq!(recv(&mut alice).await, r#"ROOM_PEER_MSG carol {"sdp":{}}"#);

    send(&mut carol, "ROOM_PEER_MSG dave hi").await;
    assert_eq!(recv(&mut carol).await, "ERROR: peer 'dave' is not in this room");

    send(&mut bob, "LEAVE").await;
    assert_eq!(recv(&mut bob).await, "LEAVE_OK");
    assert_eq!(recv(&mut alice).await, "ROOM_PEER_LEFT bob");
    assert_eq!(recv(&mut carol).await, "ROOM_PEER_LEFT bob");

    carol.close(None).await.unwrap();
    assert_eq!(recv(&mut alice).await, "ROOM_PEER_LEFT carol");

    server.shutdown();
}

#[tokio::test]
async fn test_idle_errors() {
    let server = boot_server().await;
    let mut alice = hello(server.addr(), "alice").await;

    send(&mut alice, "FOO bar").await;
    assert_eq!(recv(&mut alice).await, "ERROR: Unknown command");

    send(&mut alice, r#"{"ice":{"candidate":"x"}}"#).await;
    assert_eq!(recv(&mut alice).await, "ERROR: not in a session or room");

    send(&mut alice, "ROOM").await;
    assert_eq!(recv(&mut alice).await, "ERROR: ROOM requires an argument");

    // Still connected after errors
    send(&mut alice, "LEAVE").await;
    assert_eq!(recv(&mut alice).await, "ERROR: not in a session or room");

    server.shutdown();
}

#[tokio::test]
async fn test_handshake_rejections() {
    let server = boot_server().await;
    let broker = server.broker().clone();
    let _alice = hello(server.addr(), "alice").await;

    let mut dup = connect(server.addr()).await;
    send(&mut dup, "HELLO alice").await;
    let frame = recv_close(&mut dup).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1002);
    assert_eq!(frame.reason.as_str(), "invalid peer uid");

    let mut bad = connect(server.addr()).await;
    send(&mut bad, "SESSION alice").await;
    let frame = recv_close(&mut bad).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1002);
    assert_eq!(frame.reason.as_str(), "invalid protocol");

    let mut spaced = connect(server.addr()).await;
    send(&mut spaced, "HELLO two words").await;
    let frame = recv_close(&mut spaced).await.expect("close frame");
    assert_eq!(frame.reason.as_str(), "invalid peer uid");

    assert_eq!(broker.peer_count().await, 1);
    server.shutdown();
}

#[tokio::test]
async fn test_silent_client_closed_after_handshake_window() {
    let config = ServerConfig {
        handshake_timeout_secs: 1,
        ..local_config()
    };
    let server = Server::start(&config, Broker::new()).await.unwrap();
    let broker = server.broker().clone();

    let mut silent = connect(server.addr()).await;
    let frame = recv_close(&mut silent).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1002);
    assert_eq!(frame.reason.as_str(), "handshake timeout");

    // Nothing was registered, and the server still accepts peers
    assert_eq!(broker.peer_count().await, 0);
    let _alice = hello(server.addr(), "alice").await;
    wait_for_peers(&broker, 1).await;

    server.shutdown();
}

#[tokio::test]
async fn test_repeated_hello_closes_connection() {
    let server = boot_server().await;
    let broker = server.broker().clone();
    let mut alice = hello(server.addr(), "alice").await;

    send(&mut alice, "HELLO alice").await;
    let frame = recv_close(&mut alice).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1002);

    wait_for_peers(&broker, 0).await;
    server.shutdown();
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = boot_server().await;

    let mut stream = TcpStream::connect(server.addr()).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    // Any other path is a signaling endpoint
    let (mut ws, _) = connect_async(format!("ws://{}/signaling/any", server.addr()))
        .await
        .unwrap();
    send(&mut ws, "HELLO alice").await;
    assert_eq!(recv(&mut ws).await, "HELLO");

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_peers() {
    let server = boot_server().await;
    let broker = server.broker().clone();
    let mut alice = hello(server.addr(), "alice").await;

    server.shutdown();
    let frame = recv_close(&mut alice).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);

    wait_for_peers(&broker, 0).await;
    server.wait().await.unwrap();
}
