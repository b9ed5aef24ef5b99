//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It tracks two sets of live sockets: robots (which receive commands) and
//! viewers (which receive everything robots stream). Each socket owns a
//! bounded queue; fan-out is best effort and skips full queues so one slow
//! viewer never stalls a robot.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use frames::Payload;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Per-socket outbound queue depth.
pub const CLIENT_QUEUE: usize = 256;

/// One message fanned out to viewers.
#[derive(Debug, Clone, PartialEq)]
pub enum Relay {
    Text(String),
    Binary(Bytes),
}

// =============================================================================
// ROBOT SESSION
// =============================================================================

/// A connected robot.
pub struct RobotSession {
    /// Outbound queue of encoded command messages.
    pub tx: mpsc::Sender<String>,
    /// Latest `robot_info` payload, once announced.
    pub info: Option<Payload>,
    pub connected_at_ms: i64,
    pub frames_relayed: u64,
}

/// Public view of a robot, as listed by `GET /api/robots`.
#[derive(Debug, Clone, Serialize)]
pub struct RobotSummary {
    pub id: Uuid,
    pub info: Option<Payload>,
    pub connected_at_ms: i64,
    pub frames_relayed: u64,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; all fields are Arc-wrapped.
#[derive(Clone, Default)]
pub struct AppState {
    pub robots: Arc<RwLock<HashMap<Uuid, RobotSession>>>,
    pub viewers: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Relay>>>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_robot(&self, robot_id: Uuid, tx: mpsc::Sender<String>) {
        let session = RobotSession { tx, info: None, connected_at_ms: frames::now_ms(), frames_relayed: 0 };
        self.robots.write().await.insert(robot_id, session);
    }

    pub async fn remove_robot(&self, robot_id: Uuid) {
        self.robots.write().await.remove(&robot_id);
    }

    pub async fn set_robot_info(&self, robot_id: Uuid, info: Payload) {
        if let Some(session) = self.robots.write().await.get_mut(&robot_id) {
            session.info = Some(info);
        }
    }

    pub async fn count_frame(&self, robot_id: Uuid) {
        if let Some(session) = self.robots.write().await.get_mut(&robot_id) {
            session.frames_relayed += 1;
        }
    }

    pub async fn robot_summaries(&self) -> Vec<RobotSummary> {
        let robots = self.robots.read().await;
        let mut summaries: Vec<RobotSummary> = robots
            .iter()
            .map(|(id, session)| RobotSummary {
                id: *id,
                info: session.info.clone(),
                connected_at_ms: session.connected_at_ms,
                frames_relayed: session.frames_relayed,
            })
            .collect();
        summaries.sort_by_key(|summary| summary.connected_at_ms);
        summaries
    }

    /// Queue `text` for every robot. Returns how many accepted it.
    pub async fn send_to_robots(&self, text: &str) -> usize {
        let robots = self.robots.read().await;
        robots
            .iter()
            .filter(|(robot_id, session)| {
                let accepted = session.tx.try_send(text.to_owned()).is_ok();
                if !accepted {
                    debug!(%robot_id, "state: robot queue full or closed, command dropped");
                }
                accepted
            })
            .count()
    }

    pub async fn add_viewer(&self, viewer_id: Uuid, tx: mpsc::Sender<Relay>) {
        self.viewers.write().await.insert(viewer_id, tx);
    }

    pub async fn remove_viewer(&self, viewer_id: Uuid) {
        self.viewers.write().await.remove(&viewer_id);
    }

    /// Fan out to every viewer. Returns how many accepted it.
    pub async fn relay_to_viewers(&self, relay: Relay) -> usize {
        let viewers = self.viewers.read().await;
        // Best-effort: a full viewer queue skips this message.
        viewers.values().filter(|tx| tx.try_send(relay.clone()).is_ok()).count()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
