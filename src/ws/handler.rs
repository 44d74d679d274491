//! WebSocket upgrade handler

use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputEvent, PlayerInput, TableEvent, TableHandle};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Longest display name kept from the query string
const MAX_NAME_LEN: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Table to join; the first open table when absent
    pub table: Option<Uuid>,
    /// Display name used for seats and scoring
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let table = match query.table {
        Some(id) => state.tables.get(&id),
        None => state.tables.default_table(),
    }
    .ok_or_else(|| AppError::NotFound("No such table".to_string()))?;

    let connection_id = Uuid::new_v4();
    let name = display_name(query.name.as_deref(), connection_id);
    info!(table_id = %table.id, connection_id = %connection_id, player = %name, "WebSocket upgrade");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, connection_id, name, table)))
}

fn display_name(raw: Option<&str>, connection_id: Uuid) -> String {
    let name: String = raw
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if name.is_empty() {
        format!("Player_{}", &connection_id.simple().to_string()[..8])
    } else {
        name
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, connection_id: Uuid, name: String, table: TableHandle) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        connection_id,
        table_id: table.id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send welcome");
        return;
    }

    // subscribe before announcing so the board sync is not missed
    let events_rx = table.events_tx.subscribe();
    table.connections.fetch_add(1, Ordering::Relaxed);

    let announced = table
        .input_tx
        .send(PlayerInput {
            connection_id,
            name: name.clone(),
            event: InputEvent::Connected,
            received_at: unix_millis(),
        })
        .await;

    if announced.is_ok() {
        run_session(connection_id, name, ws_sink, ws_stream, table.input_tx.clone(), events_rx).await;
    } else {
        warn!(table_id = %table.id, "Table is closed");
    }

    table.connections.fetch_sub(1, Ordering::Relaxed);
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: Uuid,
    name: String,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<PlayerInput>,
    mut events_rx: broadcast::Receiver<TableEvent>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: table events -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    if !event.is_for(connection_id) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &event.msg).await {
                        debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        connection_id = %connection_id,
                        lagged_count = n,
                        "Client lagged, skipping {} events", n
                    );
                    // Continue - poses are resent every tick
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %connection_id, "Table event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> table loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if !admit(&rate_limiter, &client_msg) {
                            debug!(connection_id = %connection_id, "Rate limited stream message");
                            continue;
                        }

                        let input = PlayerInput {
                            connection_id,
                            name: name.clone(),
                            event: InputEvent::Message(client_msg),
                            received_at: unix_millis(),
                        };

                        if input_tx.send(input).await.is_err() {
                            debug!(connection_id = %connection_id, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Free the seat this connection held
    let _ = input_tx
        .send(PlayerInput {
            connection_id,
            name,
            event: InputEvent::Disconnected,
            received_at: unix_millis(),
        })
        .await;

    writer_handle.abort();
}

/// Only streamed messages count against the rate limit. Shots, seat
/// changes and menu actions always reach the table.
fn admit(limiter: &ConnectionRateLimiter, msg: &ClientMsg) -> bool {
    match msg {
        ClientMsg::Aim { .. } | ClientMsg::Ping { .. } => limiter.check_stream(),
        _ => true,
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
