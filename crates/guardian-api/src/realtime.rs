//! Websocket change stream.
//!
//! `GET /api/v1/realtime?table=esg_metrics&event=INSERT&after=42` upgrades
//! to a websocket and streams matching committed changes as JSON text
//! frames. Each connection holds its own process-unique feed channel for
//! as long as the socket is open. A client that falls behind is told so
//! and disconnected; it reconnects with `after` set to the last `seq` it
//! saw.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use guardian_state::{ChangeFilter, EventKind, FeedError, FeedReceiver, Seq, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ApiState;

const SCHEMA: &str = "public";

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub table: String,
    /// INSERT, UPDATE or DELETE; every kind when absent.
    pub event: Option<String>,
    /// Resume after this commit sequence.
    pub after: Option<Seq>,
}

/// Frame sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Subscribed { channel: String },
    Change { event: guardian_state::ChangeEvent },
    Error { error: String },
}

impl StreamMessage {
    fn to_text(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                warn!(error = %e, "failed to encode stream message");
                None
            }
        }
    }
}

/// Parse the query into a feed filter.
pub fn parse_filter(query: &RealtimeQuery) -> Result<ChangeFilter, String> {
    let table: Table = query.table.parse().map_err(|_| format!("unknown table {}", query.table))?;
    let event = match query.event.as_deref() {
        None | Some("*") => None,
        Some(kind) => Some(kind.parse::<EventKind>().map_err(|e| e.to_string())?),
    };
    Ok(ChangeFilter {
        schema: SCHEMA.to_string(),
        table,
        event,
    })
}

/// GET /api/v1/realtime
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<RealtimeQuery>,
) -> Response {
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let n = state.next_channel.fetch_add(1, Ordering::Relaxed) + 1;
    let channel = format!("realtime:{}:{n}", filter.table);
    let rx = match state.store.feed().open(&channel, filter, query.after) {
        Ok(rx) => rx,
        Err(e) => return (StatusCode::CONFLICT, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_connection(socket, rx))
}

async fn handle_connection(mut socket: WebSocket, mut rx: FeedReceiver) {
    let channel = rx.channel().to_string();
    info!(%channel, "realtime client connected");

    if let Some(msg) = (StreamMessage::Subscribed {
        channel: channel.clone(),
    })
    .to_text()
        && socket.send(msg).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(event) => {
                    let Some(msg) = (StreamMessage::Change { event }).to_text() else {
                        continue;
                    };
                    if socket.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(FeedError::Lagged(n)) => {
                    warn!(%channel, skipped = n, "realtime client lagged, disconnecting");
                    if let Some(msg) = (StreamMessage::Error {
                        error: format!("lagged by {n} events; reconnect with after=<last seq>"),
                    })
                    .to_text()
                    {
                        let _ = socket.send(msg).await;
                    }
                    break;
                }
                Err(FeedError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                _ => continue,
            }
        }
    }

    debug!(%channel, "realtime client disconnected");
}
