//! Robot capability seam.
//!
//! DESIGN
//! ======
//! Actuation, speech, vision and human awareness are opaque async
//! operations behind `RobotActions`. Nothing in this crate reaches for an
//! ambient robot context: a `Focus` wraps the capability handle and is
//! passed explicitly. Releasing the focus (robot taken over by another
//! app, shutdown) makes every later call fail with `RobotError::FocusLost`
//! instead of touching a stale handle.
//!
//! `SimulatedRobot` stands in for real hardware in the CLI and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunked::{StreamableBuffer, StreamableObject};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RobotError {
    #[error("robot focus lost")]
    FocusLost,
    #[error("action cancelled")]
    Cancelled,
    #[error("unknown animation: {0}")]
    UnknownAnimation(String),
    #[error("robot action failed: {0}")]
    Failed(String),
}

/// A picture still held by the robot. Bytes are paged out on demand.
#[derive(Clone)]
pub struct Picture {
    pub captured_at_ms: i64,
    pub data: Arc<dyn StreamableObject>,
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("captured_at_ms", &self.captured_at_ms)
            .field("size", &self.data.size())
            .finish()
    }
}

/// Opaque reference to a human tracked by the robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanHandle(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInfo {
    pub handle: HumanHandle,
    pub attention: String,
    pub engagement: String,
    pub emotion: String,
    pub estimated_age: Option<u32>,
    pub estimated_gender: Option<String>,
}

/// Everything the link consumes from the robot.
#[async_trait]
pub trait RobotActions: Send + Sync {
    async fn say(&self, text: &str) -> Result<(), RobotError>;
    async fn say_with_animation(&self, text: &str) -> Result<(), RobotError>;
    async fn animate(&self, animation: &str) -> Result<(), RobotError>;
    async fn go_to(&self, x: f64, y: f64, theta: f64) -> Result<(), RobotError>;
    async fn engage(&self, human: &HumanHandle) -> Result<(), RobotError>;
    async fn take_picture(&self) -> Result<Picture, RobotError>;
    async fn humans_around(&self) -> Result<Vec<HumanInfo>, RobotError>;
}

// =============================================================================
// FOCUS
// =============================================================================

/// Scoped access to the robot. Cloning shares the same focus.
#[derive(Clone)]
pub struct Focus {
    robot: Arc<dyn RobotActions>,
    held: Arc<AtomicBool>,
}

impl Focus {
    #[must_use]
    pub fn acquire(robot: Arc<dyn RobotActions>) -> Self {
        info!("robot: focus acquired");
        Self { robot, held: Arc::new(AtomicBool::new(true)) }
    }

    /// Idempotent. Later `robot()` calls fail with `FocusLost`.
    pub fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            info!("robot: focus released");
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn robot(&self) -> Result<&dyn RobotActions, RobotError> {
        if self.is_held() { Ok(self.robot.as_ref()) } else { Err(RobotError::FocusLost) }
    }
}

// =============================================================================
// SIMULATED ROBOT
// =============================================================================

const KNOWN_ANIMATIONS: &[&str] = &["dance", "raiseHands", "hello", "nod"];

/// A robot that logs every action and fabricates pictures.
pub struct SimulatedRobot {
    picture_size: usize,
    action_delay: Duration,
    pictures_taken: AtomicU64,
}

impl SimulatedRobot {
    #[must_use]
    pub fn new(picture_size: usize, action_delay: Duration) -> Self {
        Self { picture_size, action_delay, pictures_taken: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn pictures_taken(&self) -> u64 {
        self.pictures_taken.load(Ordering::Relaxed)
    }

    async fn act(&self) {
        if !self.action_delay.is_zero() {
            tokio::time::sleep(self.action_delay).await;
        }
    }
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        Self::new(64 * 1024, Duration::from_millis(200))
    }
}

#[async_trait]
impl RobotActions for SimulatedRobot {
    async fn say(&self, text: &str) -> Result<(), RobotError> {
        info!(%text, "robot: say");
        self.act().await;
        Ok(())
    }

    async fn say_with_animation(&self, text: &str) -> Result<(), RobotError> {
        info!(%text, "robot: say with animation");
        self.act().await;
        Ok(())
    }

    async fn animate(&self, animation: &str) -> Result<(), RobotError> {
        if !KNOWN_ANIMATIONS.contains(&animation) {
            return Err(RobotError::UnknownAnimation(animation.to_owned()));
        }
        info!(%animation, "robot: animate");
        self.act().await;
        Ok(())
    }

    async fn go_to(&self, x: f64, y: f64, theta: f64) -> Result<(), RobotError> {
        info!(x, y, theta, "robot: go to");
        self.act().await;
        Ok(())
    }

    async fn engage(&self, human: &HumanHandle) -> Result<(), RobotError> {
        info!(human = %human.0, "robot: engage");
        Ok(())
    }

    async fn take_picture(&self) -> Result<Picture, RobotError> {
        let seq = self.pictures_taken.fetch_add(1, Ordering::Relaxed);
        let mut data = Vec::with_capacity(self.picture_size.max(4));
        // JPEG start-of-image marker, then a recognisable fill.
        data.extend_from_slice(&[0xFF, 0xD8]);
        let fill = u8::try_from(seq % 256).unwrap_or(0);
        data.resize(self.picture_size.max(4) - 2, fill);
        data.extend_from_slice(&[0xFF, 0xD9]);

        Ok(Picture { captured_at_ms: frames::now_ms(), data: Arc::new(StreamableBuffer::from_vec(data)) })
    }

    async fn humans_around(&self) -> Result<Vec<HumanInfo>, RobotError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[path = "robot_test.rs"]
mod tests;
