//! REST routes for operators: push a command, list robots.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::state::{AppState, RobotSummary};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidMessage(#[from] frames::ParseError),
    #[error("no robot connected")]
    NoRobot,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::NoRobot => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub delivered: usize,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `POST /api/command`: forward one message to every connected robot.
///
/// # Errors
///
/// 400 when the body is not a message object with a `type`; 404 when no
/// robot took it.
pub async fn post_command(State(state): State<AppState>, body: String) -> Result<Json<CommandAccepted>, ApiError> {
    let message = frames::decode_message(&body)?;
    let delivered = state.send_to_robots(&frames::encode_message(&message)).await;
    if delivered == 0 {
        return Err(ApiError::NoRobot);
    }
    info!(kind = %message.kind(), delivered, "api: command forwarded");
    Ok(Json(CommandAccepted { delivered, kind: message.kind().to_string() }))
}

/// `GET /api/robots`
pub async fn list_robots(State(state): State<AppState>) -> Json<Vec<RobotSummary>> {
    Json(state.robot_summaries().await)
}
