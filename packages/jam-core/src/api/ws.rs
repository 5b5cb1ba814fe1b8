//! WebSocket gateway between jam clients and the coordinator.
//!
//! One connection = one user in one room. On connect the user joins and
//! receives the `init` snapshot; afterwards room events are forwarded as
//! text frames and inbound text frames are handled as client commands.
//! Disconnecting leaves the room.
//!
//! Liveness: the server pings on every heartbeat tick and any inbound frame
//! (pong, `heartbeat`, command) counts as activity. A client silent past
//! the heartbeat timeout is dropped.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::JamError;
use crate::protocol::{JamMessage, MessageType};
use crate::utils::validate_id;

type WsSender = SplitSink<WebSocket, Message>;

#[derive(Deserialize)]
pub struct WsParams {
    user_id: String,
}

/// Reply to an inbound frame that could not be parsed at all.
#[derive(Serialize)]
struct WsParseError {
    #[serde(rename = "type")]
    kind: &'static str,
    error: String,
}

fn to_message(msg: &JamMessage) -> Option<Message> {
    let bytes = msg.encode().ok()?;
    String::from_utf8(bytes).ok().map(|s| Message::Text(s.into()))
}

async fn send_jam(sender: &mut WsSender, msg: &JamMessage) -> bool {
    match to_message(msg) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => {
            log::warn!("[WS] Failed to encode {} message", msg.kind);
            true
        }
    }
}

/// WebSocket upgrade handler for `GET /ws/{room_id}?user_id=...`.
///
/// Unknown rooms and blank user ids are rejected before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    if let Err(e) = validate_id("user_id", &params.user_id) {
        return JamError::InvalidRequest(e).into_response();
    }
    match state.coordinator.repository().exists_room(&room_id).await {
        Ok(true) => {}
        Ok(false) => return JamError::RoomNotFound(room_id).into_response(),
        Err(e) => return e.into_response(),
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state, room_id, params.user_id))
}

async fn handle_ws(socket: WebSocket, state: AppState, room_id: String, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let conn_guard = state.ws_manager.register(&room_id, &user_id);
    let cancel_token = conn_guard.cancel_token().clone();

    // Subscribe before joining so nothing published after the snapshot is missed.
    let mut events = match state.coordinator.subscribe_to_jam_messages(&room_id).await {
        Ok(events) => events,
        Err(e) => {
            log::warn!("[WS] {} could not subscribe to {}: {}", conn_guard.id(), room_id, e);
            send_jam(&mut sender, &JamMessage::error_reply(MessageType::Init, e.to_string())).await;
            return;
        }
    };

    let init = match state.coordinator.join_jam(&room_id, &user_id).await {
        Ok(init) => init,
        Err(e) => {
            log::warn!("[WS] {} failed to join {}: {}", user_id, room_id, e);
            send_jam(&mut sender, &JamMessage::error_reply(MessageType::Init, e.to_string())).await;
            return;
        }
    };

    let mut room_closed = false;
    if send_jam(&mut sender, &init).await {
        let heartbeat_timeout = Duration::from_secs(state.config.ws_heartbeat_timeout_secs);
        let mut last_activity = Instant::now();
        let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(
            state.config.ws_heartbeat_check_interval_secs,
        ));
        heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                    break;
                }
                msg = receiver.next() => {
                    last_activity = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_text(&state, &room_id, &user_id, text.as_str().as_bytes(), &mut sender).await;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("[WS] Ignoring binary frame from {}", user_id);
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
                event = events.next() => {
                    match event {
                        Some(msg) => {
                            let closing = msg.kind == MessageType::JamClosed;
                            if !send_jam(&mut sender, &msg).await {
                                break;
                            }
                            if closing {
                                room_closed = true;
                                break;
                            }
                        }
                        None => {
                            room_closed = true;
                            break;
                        }
                    }
                }
                _ = heartbeat_interval.tick() => {
                    if last_activity.elapsed() > heartbeat_timeout {
                        log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                        break;
                    }
                    // Clients answer pings automatically; the pong counts as activity.
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    events.cancel();
    drop(events);

    if !room_closed {
        match state.coordinator.leave_jam(&room_id, &user_id).await {
            Ok(()) | Err(JamError::RoomNotFound(_)) => {}
            Err(e) => log::warn!("[WS] Leave for {} in {} failed: {}", user_id, room_id, e),
        }
    }
    let _ = sender.close().await;
    // ConnectionGuard drop unregisters the connection
}

/// Handles one inbound text frame. Errors are reported to this client only.
async fn handle_text(
    state: &AppState,
    room_id: &str,
    user_id: &str,
    text: &[u8],
    sender: &mut WsSender,
) {
    let msg = match JamMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("[WS] Unparseable frame from {}: {}", user_id, e);
            let reply = WsParseError {
                kind: "error",
                error: e.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            return;
        }
    };

    let kind = msg.kind;
    if kind == MessageType::Heartbeat {
        send_jam(sender, &JamMessage::new(MessageType::HeartbeatAck)).await;
        return;
    }

    if let Err(e) = state
        .coordinator
        .handle_client_message(room_id, user_id, msg)
        .await
    {
        log::debug!("[WS] {} from {} rejected: {}", kind, user_id, e);
        send_jam(sender, &JamMessage::error_reply(kind, e.to_string())).await;
    }
}
