//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Robots dial `/ws/pepper`; browsers and the CLI watch on `/ws/viewer` and
//! push commands over `POST /api/command`. A minimal viewer page is served at
//! `/`.

pub mod command;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const VIEWER_PAGE: &str = include_str!("../../static/viewer.html");

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(viewer_page))
        .route("/ws/pepper", get(ws::robot_ws))
        .route("/ws/viewer", get(ws::viewer_ws))
        .route("/api/command", post(command::post_command))
        .route("/api/robots", get(command::list_robots))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn viewer_page() -> Html<&'static str> {
    Html(VIEWER_PAGE)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
