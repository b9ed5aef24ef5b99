//! WebSocket handlers for robots and viewers.
//!
//! DESIGN
//! ======
//! Robots and viewers each get a `select!` loop over their socket and their
//! outbound queue. Inbound robot text goes through `process_robot_text`,
//! which returns an `Outcome`; the loop owns every send.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register the socket's queue in `AppState`
//! 2. Robot text → `Outcome` (reply, relay to viewers, or ignore)
//!    Robot binary → relayed to viewers as-is
//!    Viewer text → validated and forwarded to robots as a command
//! 3. Close → unregister

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{FIELD_TIMESTAMP, Kind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, CLIENT_QUEUE, Relay};

// =============================================================================
// OUTCOME
// =============================================================================

/// What to do with one robot text message.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// Answer the robot directly.
    Reply(String),
    /// Forward the original text to viewers.
    Relay(String),
    Ignore,
}

// =============================================================================
// ROBOT
// =============================================================================

pub async fn robot_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_robot(socket, state))
}

async fn run_robot(mut socket: WebSocket, state: AppState) {
    let robot_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    state.add_robot(robot_id, tx).await;
    info!(%robot_id, "ws: robot connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => match process_robot_text(&state, robot_id, text.as_str()).await {
                        Outcome::Reply(reply) => {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                        Outcome::Relay(text) => {
                            state.relay_to_viewers(Relay::Text(text)).await;
                        }
                        Outcome::Ignore => {}
                    },
                    Message::Binary(bytes) => {
                        debug!(%robot_id, len = bytes.len(), "ws: frame");
                        state.count_frame(robot_id).await;
                        state.relay_to_viewers(Relay::Binary(bytes)).await;
                    }
                    Message::Close(frame) => {
                        info!(%robot_id, code = frame.as_ref().map(|f| f.code), "ws: robot closed");
                        break;
                    }
                    _ => {}
                }
            }
            Some(command) = rx.recv() => {
                if socket.send(Message::Text(command.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.remove_robot(robot_id).await;
    info!(%robot_id, "ws: robot disconnected");
}

async fn process_robot_text(state: &AppState, robot_id: Uuid, text: &str) -> Outcome {
    let message = match frames::decode_message(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(%robot_id, error = %e, "ws: invalid robot message");
            return Outcome::Ignore;
        }
    };

    match message.kind() {
        Kind::Ping => {
            let mut pong = frames::Message::pong();
            if let Some(sent) = message.payload().get(FIELD_TIMESTAMP) {
                pong = pong.with_field(FIELD_TIMESTAMP, sent.clone());
            }
            Outcome::Reply(frames::encode_message(&pong))
        }
        Kind::Pong => Outcome::Ignore,
        Kind::RobotInfo => {
            info!(%robot_id, name = message.str_field("name").unwrap_or("?"), "ws: robot announced");
            state.set_robot_info(robot_id, message.payload().clone()).await;
            Outcome::Relay(text.to_owned())
        }
        kind => {
            debug!(%robot_id, %kind, "ws: telemetry");
            Outcome::Relay(text.to_owned())
        }
    }
}

// =============================================================================
// VIEWER
// =============================================================================

pub async fn viewer_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_viewer(socket, state))
}

async fn run_viewer(mut socket: WebSocket, state: AppState) {
    let viewer_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Relay>(CLIENT_QUEUE);
    state.add_viewer(viewer_id, tx).await;
    info!(%viewer_id, "ws: viewer connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => forward_viewer_command(&state, viewer_id, text.as_str()).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(relay) = rx.recv() => {
                let msg = match relay {
                    Relay::Text(text) => Message::Text(text.into()),
                    Relay::Binary(bytes) => Message::Binary(bytes),
                };
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }

    state.remove_viewer(viewer_id).await;
    info!(%viewer_id, "ws: viewer disconnected");
}

async fn forward_viewer_command(state: &AppState, viewer_id: Uuid, text: &str) {
    match frames::decode_message(text) {
        Ok(message) => {
            let delivered = state.send_to_robots(&frames::encode_message(&message)).await;
            info!(%viewer_id, kind = %message.kind(), delivered, "ws: viewer command forwarded");
        }
        Err(e) => warn!(%viewer_id, error = %e, "ws: invalid viewer command"),
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
