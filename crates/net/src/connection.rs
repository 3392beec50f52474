//! Per-connection control loop
//!
//! Each WebSocket connection is served by one task that owns its whole
//! lifecycle: the HELLO handshake, command dispatch, payload routing, and
//! the cleanup cascade on the way out. Outbound frames go through a writer
//! task fed by the peer's queue, so other connections never touch the
//! socket directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parley_core::{Broker, BrokerError, PeerSender, PeerStatus};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::liveness::{self, Inbound};
use crate::protocol::{is_negotiation_payload, Command, Reply, CLOSE_GOING_AWAY, CLOSE_PROTOCOL_ERROR};

/// How long a final close frame gets to go out
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Control frames for a connection's writer
#[derive(Debug)]
pub(crate) enum Control {
    /// Keepalive probe
    Ping,
    /// Close the connection with a code and reason
    Close { code: u16, reason: String },
}

/// Per-connection tunables
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bounded wait for the HELLO message
    pub handshake_timeout: Duration,
    /// Silence after which the peer is pinged
    pub keepalive_timeout: Duration,
    /// Capacity of the peer's outbound queue
    pub outbound_queue: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            keepalive_timeout: Duration::from_secs(30),
            outbound_queue: 64,
        }
    }
}

/// Why the control loop ended
enum Exit {
    Closed,
    Failed(axum::Error),
    Violation(&'static str),
    Shutdown,
}

/// Serve one upgraded WebSocket until it closes
pub async fn handle_connection(
    socket: WebSocket,
    addr: SocketAddr,
    broker: Broker,
    settings: Arc<ConnectionSettings>,
    shutdown: watch::Receiver<bool>,
) {
    let span = info_span!("connection", conn_id = %Uuid::new_v4(), addr = %addr);
    serve(socket, addr, broker, settings, shutdown)
        .instrument(span)
        .await
}

async fn serve<S>(
    socket: S,
    addr: SocketAddr,
    broker: Broker,
    settings: Arc<ConnectionSettings>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = std::result::Result<Message, axum::Error>>
        + Sink<Message, Error = axum::Error>
        + Send
        + 'static,
{
    debug!("New connection");
    let (mut sink, mut stream) = socket.split();

    // First message must be HELLO
    let (peer_id, out_tx, out_rx) =
        match handshake(&mut stream, addr, &broker, &settings).await {
            Ok(registered) => registered,
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                if let Some(reason) = close_reason(&e) {
                    let _ = sink.send(close_frame(CLOSE_PROTOCOL_ERROR, reason)).await;
                    let _ = sink.close().await;
                }
                return;
            }
        };

    info!(peer_id = %peer_id, "Peer joined");

    let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
    let mut writer = tokio::spawn(writer_task(sink, out_rx, ctrl_rx));

    let exit = tokio::select! {
        exit = control_loop(&mut stream, &peer_id, &broker, &out_tx, &ctrl_tx, &settings) => exit,
        _ = async {
            // A closed channel means the server is gone too
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        } => Exit::Shutdown,
    };

    let closing = match exit {
        Exit::Closed => {
            debug!(peer_id = %peer_id, "Connection closed");
            false
        }
        Exit::Failed(e) => {
            warn!(peer_id = %peer_id, error = %e, "Read error");
            false
        }
        Exit::Violation(reason) => {
            warn!(peer_id = %peer_id, reason, "Protocol violation");
            let _ = ctrl_tx.try_send(Control::Close {
                code: CLOSE_PROTOCOL_ERROR,
                reason: reason.to_string(),
            });
            true
        }
        Exit::Shutdown => {
            debug!(peer_id = %peer_id, "Closing for shutdown");
            let _ = ctrl_tx.try_send(Control::Close {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down".into(),
            });
            true
        }
    };

    // Cleanup cascade
    broker.disconnect(&peer_id).await;
    drop(out_tx);

    if closing {
        let _ = tokio::time::timeout(CLOSE_GRACE, &mut writer).await;
    }
    drop(ctrl_tx);
    writer.abort();

    info!(peer_id = %peer_id, "Peer disconnected");
}

/// Wait for `HELLO <id>` and register the peer
async fn handshake<S>(
    stream: &mut S,
    addr: SocketAddr,
    broker: &Broker,
    settings: &ConnectionSettings,
) -> Result<(String, PeerSender, mpsc::Receiver<String>)>
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    let text = match tokio::time::timeout(settings.handshake_timeout, liveness::next_text(stream))
        .await
    {
        Ok(Inbound::Text(text)) => text,
        Ok(Inbound::Closed) => return Err(Error::ConnectionClosed),
        Ok(Inbound::Failed(e)) => return Err(Error::Transport(e)),
        Err(_) => return Err(Error::HandshakeTimeout),
    };

    let id = match Command::parse(&text) {
        Command::Hello(id) => id.to_string(),
        _ => return Err(Error::Protocol("invalid protocol".into())),
    };

    let (tx, rx) = mpsc::channel(settings.outbound_queue.max(1));

    // Queue the acknowledgment ahead of anything routed to us
    let _ = tx.try_send(Reply::Hello.to_string());

    broker.register(&id, addr, tx.clone()).await.map_err(|e| {
        debug!(error = %e, "Registration refused");
        Error::Protocol("invalid peer uid".into())
    })?;

    Ok((id, tx, rx))
}

/// Read, dispatch and reply until the connection ends
async fn control_loop<S>(
    stream: &mut S,
    peer_id: &str,
    broker: &Broker,
    out: &PeerSender,
    ctrl: &mpsc::Sender<Control>,
    settings: &ConnectionSettings,
) -> Exit
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    loop {
        let text = match liveness::recv_or_probe(stream, ctrl, settings.keepalive_timeout).await {
            Inbound::Text(text) => text,
            Inbound::Closed => return Exit::Closed,
            Inbound::Failed(e) => return Exit::Failed(e),
        };

        match dispatch(peer_id, &text, broker).await {
            Ok(Some(reply)) => {
                if out.send(reply).await.is_err() {
                    // Writer is gone
                    return Exit::Closed;
                }
            }
            Ok(None) => {}
            Err(reason) => return Exit::Violation(reason),
        }
    }
}

/// Handle one message from a registered peer.
///
/// Returns the reply for the sender, if any, or the reason for a
/// protocol violation. `SESSION_OK` and `ROOM_OK` are queued by the
/// broker itself.
async fn dispatch(
    peer_id: &str,
    text: &str,
    broker: &Broker,
) -> std::result::Result<Option<String>, &'static str> {
    let result: std::result::Result<Option<Reply<'_>>, BrokerError> = match Command::parse(text) {
        Command::Hello(_) => return Err("unexpected HELLO"),
        Command::Session(callee) => broker
            .request_session(peer_id, callee)
            .await
            .map(|()| None),
        Command::Room(room_id) => broker.join_room(peer_id, room_id).await.map(|_| None),
        Command::RoomPeerMsg { to, payload } => {
            let message = Reply::RoomPeerMsg {
                from: peer_id,
                payload,
            }
            .to_string();
            broker
                .route_to_room(peer_id, message, Some(to))
                .await
                .map(|()| None)
        }
        Command::Leave => broker.leave(peer_id).await.map(|departure| {
            debug!(peer_id = %peer_id, ?departure, "Left");
            Some(Reply::LeaveOk)
        }),
        Command::Incomplete(command) => Ok(Some(Reply::incomplete(command))),
        Command::Other(raw) => match broker.status(peer_id).await {
            Some(PeerStatus::InSession) => broker.route(peer_id, raw.to_string()).await.map(|()| None),
            Some(PeerStatus::InRoom(_)) => broker
                .route_to_room(peer_id, raw.to_string(), None)
                .await
                .map(|()| None),
            _ if is_negotiation_payload(raw) => Err(BrokerError::NotInSession),
            _ => {
                debug!(peer_id = %peer_id, "Unknown command");
                Ok(Some(Reply::unknown_command()))
            }
        },
    };

    Ok(match result {
        Ok(reply) => reply.map(|r| r.to_string()),
        Err(e) => {
            debug!(peer_id = %peer_id, error = %e, "Request failed");
            Some(Reply::from(e).to_string())
        }
    })
}

/// Drain the peer's queue and control frames into the socket
async fn writer_task<W>(
    mut sink: W,
    mut out: mpsc::Receiver<String>,
    mut ctrl: mpsc::Receiver<Control>,
) where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    loop {
        let result = tokio::select! {
            biased;
            control = ctrl.recv() => match control {
                Some(Control::Ping) => sink.send(Message::Ping(Bytes::new())).await,
                Some(Control::Close { code, reason }) => {
                    let _ = sink.send(close_frame(code, &reason)).await;
                    let _ = sink.close().await;
                    break;
                }
                None => break,
            },
            text = out.recv() => match text {
                Some(text) => sink.send(Message::Text(text.into())).await,
                None => break,
            },
        };

        if let Err(e) = result {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Close reason to send for a failed handshake, if the peer is still there
fn close_reason(e: &Error) -> Option<&str> {
    match e {
        Error::Protocol(reason) => Some(reason),
        Error::HandshakeTimeout => Some("handshake timeout"),
        _ => None,
    }
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
