//! Socket admission and the per-socket message loop.
//!
//! Every non-control-plane path is a potential document socket: the name
//! comes from the request path. Admission is decided before the upgrade
//! completes; refused sockets are still upgraded so the close code reaches
//! the client.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::hooks::ConnectRequest;
use crate::sync::names::derive_doc_name;
use crate::sync::{AttachOutcome, ClientHandle, DocCommand, SyncHub};

/// Close codes used by the server.
pub mod close_code {
    /// Server is shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Invalid document name or unauthorized.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// The auth predicate itself failed.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Capacity limit reached, try again later.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Reserved for forcing connected clients to refresh.
    #[allow(dead_code)]
    pub const FORCE_REFRESH: u16 = 4000;
}

enum Admission {
    Serve(String),
    Refuse(u16, &'static str),
}

/// Fallback handler for every non-control-plane path: the socket upgrade,
/// or the plain-text banner. `on_request` hooks and `OPTIONS` requests are
/// intercepted by the server middleware before routing.
pub async fn root_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
    uri: Uri,
) -> Response {
    let path = uri.path().to_string();

    if let Ok(ws) = ws {
        return upgrade(state, ws, path, uri.query()).await;
    }

    (
        StatusCode::OK,
        format!("mrmd-sync server v{}", env!("CARGO_PKG_VERSION")),
    )
        .into_response()
}

async fn upgrade(state: AppState, ws: WebSocketUpgrade, path: String, query: Option<&str>) -> Response {
    let request = ConnectRequest {
        path,
        query: parse_query(query),
    };

    if state.hub.hooks().on_connection(&request).await {
        // The hook claimed this connection; the built-in upgrade declines it
        return StatusCode::NOT_FOUND.into_response();
    }

    let admission = admit(&state, &request).await;
    let hub = state.hub.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match admission {
                Admission::Refuse(code, reason) => {
                    debug!(code, reason, "refusing socket");
                    close_with(socket, code, reason).await;
                }
                Admission::Serve(name) => serve_socket(socket, hub, name).await,
            }
        })
}

/// Admission control, in order: shutdown, total capacity, name validity,
/// auth predicate. The per-document cap is checked by the coordinator at
/// attach time.
async fn admit(state: &AppState, request: &ConnectRequest) -> Admission {
    if state.hub.is_shutting_down() {
        return Admission::Refuse(close_code::GOING_AWAY, "shutting down");
    }
    if state.metrics.active_connections() >= state.config.max_connections {
        return Admission::Refuse(close_code::TRY_AGAIN_LATER, "server at capacity");
    }

    let Some(name) = derive_doc_name(&request.path, state.config.path_prefix.as_deref()) else {
        return Admission::Refuse(close_code::POLICY_VIOLATION, "invalid document name");
    };

    match state.hub.hooks().authenticate(request, &name).await {
        Ok(true) => Admission::Serve(name),
        Ok(false) => Admission::Refuse(close_code::POLICY_VIOLATION, "unauthorized"),
        Err(e) => {
            error!(error = %e, doc = %name, "auth predicate failed");
            state.metrics.error();
            Admission::Refuse(close_code::INTERNAL_ERROR, "authentication error")
        }
    }
}

async fn serve_socket(socket: WebSocket, hub: Arc<SyncHub>, name: String) {
    let metrics = hub.metrics().clone();
    let handle = hub.get_or_create(&name).await;

    let client_id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (reply, ack) = oneshot::channel();
    let attached = handle.send(DocCommand::Attach {
        client: ClientHandle {
            id: client_id,
            outbound: out_tx,
        },
        reply,
    });
    if !attached {
        close_with(socket, close_code::TRY_AGAIN_LATER, "document unavailable").await;
        return;
    }

    match ack.await {
        Ok(AttachOutcome::Accepted) => {}
        Ok(AttachOutcome::AtCapacity) => {
            close_with(socket, close_code::TRY_AGAIN_LATER, "document at capacity").await;
            return;
        }
        Ok(AttachOutcome::ShuttingDown) | Err(_) => {
            close_with(socket, close_code::GOING_AWAY, "shutting down").await;
            return;
        }
    }

    metrics.connection_opened();
    info!(doc = %name, client = %client_id, "socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let ping_period = Duration::from_millis(hub.config().ping_interval_ms);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    let mut alive = true;

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        metrics.message_received(data.len());
                        handle.send(DocCommand::Inbound {
                            client_id,
                            data: data.to_vec(),
                        });
                    }
                    Some(Ok(Message::Pong(_))) => {
                        alive = true;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Text frames are not part of the protocol
                    }
                    Some(Err(e)) => {
                        warn!(doc = %name, client = %client_id, error = %e, "socket error");
                        metrics.error();
                        break;
                    }
                }
            }
            outbound = out_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        metrics.message_sent(frame.len());
                        if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Coordinator torn down (eviction or shutdown)
                    None => break,
                }
            }
            _ = ping.tick() => {
                if !alive {
                    debug!(doc = %name, client = %client_id, "heartbeat missed, terminating");
                    break;
                }
                alive = false;
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    handle.send(DocCommand::Detach { client_id });
    metrics.connection_closed();
    info!(doc = %name, client = %client_id, "socket disconnected");
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut query = HashMap::new();
    let Some(raw) = raw else {
        return query;
    };
    for pair in raw.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let Ok(key) = urlencoding::decode(key) else {
            continue;
        };
        let Ok(value) = urlencoding::decode(value) else {
            continue;
        };
        if !key.is_empty() {
            query.insert(key.into_owned(), value.into_owned());
        }
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let query = parse_query(Some("a=1&b=two%20words&flag"));
        assert_eq!(query.get("a").map(String::as_str), Some("1"));
        assert_eq!(query.get("b").map(String::as_str), Some("two words"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
        assert!(parse_query(None).is_empty());
    }
}
