use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::auth::gate::Identity;
use crate::registry::Connection;
use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server pings every 30 seconds so half-dead sockets are
/// discovered instead of leaking registry entries.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: no pong within 10 seconds of a ping closes the connection.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent to a connection replaced by a newer one from the same user.
const CLOSE_SUPERSEDED: u16 = 4009;

/// Run the actor for an admitted WebSocket connection.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel.
///   Cloning the sender is how the registry and bridge reach this client.
/// - Reader loop (this task): processes incoming frames sequentially, which
///   is what keeps one sender's messages in submission order.
///
/// Every exit route of the reader loop — client close, protocol error,
/// stream end, pong timeout — falls through to the same cleanup block, so
/// the registry entry is removed no matter how the connection dies.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    team_id: String,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = Uuid::now_v7();
    let replaced = state.registry.register(Connection {
        conn_id,
        user_id: identity.user_id.clone(),
        team_id: team_id.clone(),
        sender: tx.clone(),
    });

    // One live connection per user per instance: tell the old socket why it
    // is going away. Its own actor unregisters it on close.
    if let Some(stale) = replaced {
        tracing::info!(
            user_id = %identity.user_id,
            "Superseding previous connection for user"
        );
        let _ = stale.send(Message::Close(Some(CloseFrame {
            code: CLOSE_SUPERSEDED,
            reason: "superseded by newer connection".into(),
        })));
    }

    tracing::info!(
        user_id = %identity.user_id,
        team_id = %team_id,
        conn_id = %conn_id,
        "Connection actor started"
    );

    // Writer task: forwards mpsc frames to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: periodic pings, watches for pongs relayed by the reader.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the immediate first tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer is gone — connection already down
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Binary(data) => {
                    protocol::handle_binary_message(&data, &state, &identity, &team_id);
                }
                Message::Text(text) => {
                    // The protocol is binary; text frames are dropped.
                    tracing::debug!(
                        user_id = %identity.user_id,
                        "Ignoring text frame on binary protocol: {}",
                        text.chars().take(80).collect::<String>()
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %identity.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %identity.user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup — runs on every exit path above.
    writer_handle.abort();
    ping_handle.abort();
    state.registry.unregister(conn_id, &team_id, &identity.user_id);

    tracing::info!(
        user_id = %identity.user_id,
        team_id = %team_id,
        conn_id = %conn_id,
        "Connection actor stopped"
    );
}

/// Writer task: drains the mpsc channel into the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // Socket is broken; the reader loop sees it too and cleans up.
            break;
        }
    }
}
