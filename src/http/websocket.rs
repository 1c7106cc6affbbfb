//! WebSocket request/reply channel.
//!
//! # Protocol
//! ```text
//! → { "id": <any>, "action": "market_data" | "news" | "buffers" | "stats", "params": {...} }
//! ← { "id": <same>, "success": true, "data": ..., "request_id", "timestamp" }
//! ← { "id": <same>, "success": false, "error": ..., ... error envelope ... }
//! ```
//!
//! # Concurrency
//! ```text
//! reader loop ──spawn──▶ message task ─┐
//!             ──spawn──▶ message task ─┼──▶ mpsc ──▶ writer task ──▶ socket
//!             ──spawn──▶ message task ─┘
//! ```
//! Each inbound message runs on its own task, at most `max_in_flight` at once.
//! Only the writer task touches the socket sink, so frames never interleave.
//! Closing the connection (or server shutdown) cancels every in-flight call.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::http::handlers::{dispatch, Action};
use crate::http::request::request_id;
use crate::http::response::{
    invalid_argument, ApiError, ErrorEnvelope, SuccessEnvelope, GATEWAY_SERVICE,
};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::CallContext;

#[derive(Debug, Deserialize)]
pub struct WsRequest {
    #[serde(default)]
    pub id: Value,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct WsReply {
    pub id: Value,
    #[serde(flatten)]
    pub body: WsReplyBody,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WsReplyBody {
    Success(SuccessEnvelope),
    Error(ErrorEnvelope),
}

/// Handle WebSocket upgrade. A plain request to `/ws` gets an error envelope.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(rejection) => {
            ApiError::rejected(rejection.status(), rejection.body_text(), request_id(&headers))
                .into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let settings = state.config.websocket.clone();
    let connection = state.shutdown.child_token();
    let in_flight = Arc::new(Semaphore::new(settings.max_in_flight));

    metrics::websocket_opened();
    tracing::debug!("WebSocket session opened");

    let (tx, mut rx) = mpsc::channel::<Message>(settings.outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        let next = tokio::select! {
            _ = connection.cancelled() => {
                let _ = tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
            next = receiver.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let permit = tokio::select! {
                    _ = connection.cancelled() => continue,
                    permit = in_flight.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let tx = tx.clone();
                let state = state.clone();
                let connection = connection.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let reply = process_message(&state, &connection, text.as_str()).await;
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            let _ = tx.send(Message::Text(json.into())).await;
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to encode WebSocket reply"),
                    }
                });
            }
            Some(Ok(Message::Binary(_))) => {
                let reply = error_reply(
                    Value::Null,
                    ErrorEnvelope::new(
                        &invalid_argument(GATEWAY_SERVICE, "binary frames are not supported"),
                        uuid::Uuid::new_v4().to_string(),
                    ),
                );
                if let Ok(json) = serde_json::to_string(&reply) {
                    let _ = tx.send(Message::Text(json.into())).await;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            // Ping/pong are answered by axum.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Abort whatever is still in flight for this connection.
    connection.cancel();
    drop(tx);
    let _ = writer.await;

    metrics::websocket_closed();
    tracing::debug!("WebSocket session closed");
}

async fn process_message(state: &AppState, connection: &CancellationToken, text: &str) -> WsReply {
    let request_id = uuid::Uuid::new_v4().to_string();

    let request: WsRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            let error = invalid_argument(GATEWAY_SERVICE, format!("invalid message: {e}"));
            return error_reply(Value::Null, ErrorEnvelope::new(&error, request_id));
        }
    };

    let action = match Action::from_message(&request.action, &request.params) {
        Ok(action) => action,
        Err(error) => return error_reply(request.id, ErrorEnvelope::new(&error, request_id)),
    };

    let ctx = CallContext::new(request_id.clone()).with_cancellation(connection.child_token());
    tracing::debug!(request_id = %request_id, action = ?action, "WebSocket request");

    match dispatch(&state.clients, &ctx, &action).await {
        Ok(data) => WsReply {
            id: request.id,
            body: WsReplyBody::Success(SuccessEnvelope::new(data, request_id)),
        },
        Err(error) => error_reply(request.id, ErrorEnvelope::new(&error, request_id)),
    }
}

fn error_reply(id: Value, envelope: ErrorEnvelope) -> WsReply {
    WsReply {
        id,
        body: WsReplyBody::Error(envelope),
    }
}
