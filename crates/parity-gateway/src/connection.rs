use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parity_core::ConnectionHandle;
use tokio::sync::mpsc;

use crate::broker::{Broker, Flow};
use crate::registry::{Connection, Outbound};

const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Drive one accepted WebSocket until either side closes.
///
/// Inbound frames are dispatched in receipt order on this task. Everything
/// outbound, replies and broadcasts alike, goes through one bounded queue
/// drained by a writer task, which also sends keepalive pings.
pub async fn handle_ws_connection(
    socket: WebSocket,
    broker: Arc<Broker>,
    send_queue: usize,
    ping_interval: Duration,
) {
    let handle = broker.accept();
    let (tx, rx) = mpsc::channel(send_queue.max(1));
    let conn = Connection::new(handle, tx);
    tracing::debug!(%handle, "websocket accepted");

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(ws_tx, rx, ping_interval, handle));

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if broker.handle_text(&conn, text.as_str()).await == Flow::Close {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {} // binary, ping, pong
            Err(error) => {
                tracing::debug!(%handle, %error, "websocket read failed");
                break;
            }
        }
    }

    broker.disconnect(handle);
    // Dropping the last sender lets the writer flush what is queued and exit.
    drop(conn);
    let _ = writer.await;
    tracing::debug!(%handle, "websocket finished");
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Outbound>,
    ping_interval: Duration,
    handle: ConnectionHandle,
) {
    let mut ping = tokio::time::interval(ping_interval.max(MIN_PING_INTERVAL));
    ping.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(%handle, "sent ping");
            }
        }
    }

    let _ = ws_tx.close().await;
}
