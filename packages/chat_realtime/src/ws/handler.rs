//! WebSocket Handler
//!
//! One task per accepted socket: handshake under the auth deadline, then an
//! in-order read loop feeding the event router. A separate writer task
//! drains the connection's outbound queue and sends the close frame.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{Connection, Outbound};
use super::handshake::{CredentialFrame, HandshakeError, read_credential};
use super::hub::RealtimeHub;
use crate::directory::User;

/// Drive a connection from accept to teardown.
pub async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let metrics = hub.metrics().clone();
    metrics.connection_opened();

    let (conn, rx) = Connection::new(hub.config().send_queue_capacity);
    conn.begin_auth();
    debug!(conn_id = %conn.id(), "WebSocket connection accepted");

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut writer = tokio::spawn(writer_task(ws_sender, rx, conn.clone()));

    match handshake(&hub, &mut ws_receiver).await {
        Ok(Some(user)) => {
            if hub.open_session(&conn, &user).await {
                read_loop(&hub, &conn, &mut ws_receiver).await;
            }
            hub.disconnect(&conn).await;
        }
        Ok(None) => {
            debug!(conn_id = %conn.id(), "Client left before authenticating");
            conn.close(None);
        }
        Err(e) => {
            let code = e.close_code();
            info!(
                conn_id = %conn.id(),
                close_code = code.code(),
                error_code = e.error_code(),
                "Handshake rejected: {}",
                e
            );
            metrics.auth_failed();
            conn.close(Some(code));
        }
    }

    // Let the writer flush its queue and the close frame, but not forever
    let flush = hub.config().close_flush_timeout;
    if tokio::time::timeout(flush, &mut writer).await.is_err() {
        debug!(conn_id = %conn.id(), "Writer did not flush in time, aborting");
        writer.abort();
    }

    metrics.connection_closed();
}

/// Wait for the credential frame and resolve it to a user, all within the
/// auth deadline. `Ok(None)` means the peer went away first.
async fn handshake(
    hub: &RealtimeHub,
    ws_receiver: &mut SplitStream<WebSocket>,
) -> Result<Option<User>, HandshakeError> {
    let shutdown = hub.shutdown_token();
    let deadline = hub.config().auth_timeout;

    let attempt = async {
        let token = loop {
            match ws_receiver.next().await {
                None | Some(Err(_)) => return Ok(None),
                Some(Ok(msg)) => match read_credential(msg)? {
                    CredentialFrame::Token(token) => break token,
                    CredentialFrame::Skip => continue,
                    CredentialFrame::Closed => return Ok(None),
                },
            }
        };
        hub.authenticate(&token).await.map(Some)
    };

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(HandshakeError::Shutdown),
        res = tokio::time::timeout(deadline, attempt) => res.unwrap_or(Err(HandshakeError::NoToken)),
    }
}

async fn read_loop(
    hub: &RealtimeHub,
    conn: &Arc<Connection>,
    ws_receiver: &mut SplitStream<WebSocket>,
) {
    let cancel = conn.cancel_token();
    let metrics = hub.metrics();

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                hub.router().dispatch_text(conn, text.as_str()).await;
            }
            Some(Ok(Message::Pong(_))) => conn.mark_alive(),
            // Pongs to client pings are sent by the transport
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                debug!(conn_id = %conn.id(), "Ignoring binary frame");
                metrics.malformed_event();
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(conn_id = %conn.id(), "WebSocket receive error: {}", e);
                metrics.websocket_error();
                break;
            }
        }
    }
}

async fn send_frame(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    frame: Outbound,
) -> Result<(), axum::Error> {
    let msg = match frame {
        Outbound::Text(text) => Message::Text(text.to_string().into()),
        Outbound::Ping => Message::Ping(Vec::new().into()),
    };
    ws_sender.send(msg).await
}

/// Sole writer for the socket. Runs until the connection is closed, then
/// flushes what is already queued and sends the close frame.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) {
    let cancel = conn.cancel_token();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = send_frame(&mut ws_sender, frame).await {
            debug!(conn_id = %conn.id(), "WebSocket send failed: {}", e);
            conn.close(None);
            return;
        }
    }

    rx.close();
    while let Ok(frame) = rx.try_recv() {
        if matches!(frame, Outbound::Ping) {
            continue;
        }
        if send_frame(&mut ws_sender, frame).await.is_err() {
            return;
        }
    }

    if let Some(code) = conn.close_code() {
        let close = Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: code.reason().into(),
        }));
        if let Err(e) = ws_sender.send(close).await {
            warn!(conn_id = %conn.id(), "Failed to send close frame: {}", e);
        }
    }
    let _ = ws_sender.close().await;
}
