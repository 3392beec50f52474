//! Liveness supervision
//!
//! A quiet connection is probed, never dropped: when no frame arrives
//! within the keepalive window a ping is queued and the wait starts over.
//! Only a transport error or a close ends the wait.

use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Control;

/// What a connection's read side produced
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A text message from the peer
    Text(String),
    /// The peer closed the connection or the stream ended
    Closed,
    /// The transport failed
    Failed(axum::Error),
}

/// One frame from the read side, classified
enum Frame {
    Inbound(Inbound),
    /// Ping, pong or undecodable binary: proof of life, nothing to handle
    Heartbeat,
}

async fn next_frame<S>(stream: &mut S) -> Frame
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Message::Text(text))) => Frame::Inbound(Inbound::Text(text.to_string())),
        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Frame::Inbound(Inbound::Text(text)),
            Err(_) => {
                warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                Frame::Heartbeat
            }
        },
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Frame::Heartbeat,
        Some(Ok(Message::Close(_))) | None => Frame::Inbound(Inbound::Closed),
        Some(Err(e)) => Frame::Inbound(Inbound::Failed(e)),
    }
}

/// Wait for the next text message, skipping control frames.
///
/// Cancel-safe: a frame is only consumed once it has been handled.
pub(crate) async fn next_text<S>(stream: &mut S) -> Inbound
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        if let Frame::Inbound(inbound) = next_frame(stream).await {
            return inbound;
        }
    }
}

/// Wait for a message, probing the peer each time `window` elapses.
///
/// Any frame from the peer, pongs included, restarts the window. Probes
/// go through `control` to the connection's writer. A missed deadline
/// alone never ends the wait.
pub(crate) async fn recv_or_probe<S>(
    stream: &mut S,
    control: &mpsc::Sender<Control>,
    window: Duration,
) -> Inbound
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match tokio::time::timeout(window, next_frame(stream)).await {
            Ok(Frame::Inbound(inbound)) => return inbound,
            Ok(Frame::Heartbeat) => {}
            Err(_) => {
                debug!(window_secs = window.as_secs(), "Sending keepalive ping");
                if let Err(e) = control.try_send(Control::Ping) {
                    debug!(error = %e, "Keepalive ping not queued");
                }
            }
        }
    }
}
