//! Robot-side wiring: channel, router, capture and the robot itself.
//!
//! DESIGN
//! ======
//! - camera → `CaptureLoop` → binary frame + `frameTimestamp` on the channel
//! - channel → router worker → `Executor` → `RobotActions`
//! - every successful connect announces the robot with `robot_info`
//! - speech commands report `command_status` (started, then completed,
//!   cancelled or error)
//! - `config.websocket_url` moves the channel to another server
//!
//! Telemetry is best effort: when the channel is down it is dropped and
//! logged, never queued.

use std::sync::Arc;

use async_trait::async_trait;
use frames::{BinaryFrame, CommandStatus, Kind, Message, Payload, RobotInfo, SpeakerProfile};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, CaptureLoop, FrameListener, RobotCamera};
use crate::channel::{Channel, ChannelError, ConnectionListener};
use crate::chunked::{ChunkError, ChunkedReader};
use crate::config::LinkConfig;
use crate::robot::{Focus, RobotActions, RobotError};
use crate::router::{Command, CommandHandler, CommandRouter, HandlerError};

/// Kind used by older servers for plain `{"type":"speak","text":..}` speech.
const LEGACY_SPEAK: &str = "speak";

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Identity announced on every connect.
#[must_use]
pub fn pepper_info() -> RobotInfo {
    RobotInfo {
        name: "Pepper".to_owned(),
        version: "1.0".to_owned(),
        capabilities: vec!["speech".to_owned(), "human_awareness".to_owned()],
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

pub struct Bridge {
    channel: Channel,
    focus: Focus,
    capture: CaptureLoop,
    router: JoinHandle<()>,
}

impl Bridge {
    /// Wire everything up, connect, and start capturing.
    pub fn start(config: LinkConfig, robot: Arc<dyn RobotActions>) -> Result<Self, BridgeError> {
        Self::start_with_info(config, robot, pepper_info())
    }

    pub fn start_with_info(
        config: LinkConfig,
        robot: Arc<dyn RobotActions>,
        info: RobotInfo,
    ) -> Result<Self, BridgeError> {
        let focus = Focus::acquire(robot);
        let reader = ChunkedReader::new(config.chunk_size)?;

        let (channel, inbound) = Channel::new(config.channel, Arc::new(LinkListener { info }))?;

        let executor = Arc::new(Executor { focus: focus.clone(), channel: channel.clone() });
        let router = command_router(executor).spawn(inbound);

        let capture = CaptureLoop::new(
            Arc::new(RobotCamera::new(focus.clone(), reader)),
            Arc::new(FrameForwarder { channel: channel.clone() }),
            config.capture.frame_interval(),
        );

        channel.connect();
        capture.start()?;
        info!(url = %channel.url(), fps = config.capture.target_fps, "bridge: started");

        Ok(Self { channel, focus, capture, router })
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn capture(&self) -> &CaptureLoop {
        &self.capture
    }

    #[must_use]
    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    /// Tell the server the robot is now talking to someone else.
    pub fn report_speaker(&self, speaker: &SpeakerProfile) -> Result<(), ChannelError> {
        info!(gender = %speaker.gender, age = speaker.age, emotion = %speaker.emotion, "bridge: speaker changed");
        self.channel.send(&Message::speaker_change(speaker))
    }

    /// Stop capture and the router, close the channel, release the robot.
    pub fn shutdown(&self) {
        self.capture.release();
        self.router.abort();
        self.channel.disconnect();
        self.focus.release();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn command_router(executor: Arc<Executor>) -> CommandRouter {
    let handler: Arc<dyn CommandHandler> = executor;
    CommandRouter::new()
        .on(Kind::Command, Some("say"), Arc::clone(&handler))
        .on(Kind::Command, Some("animate"), Arc::clone(&handler))
        .on(Kind::Command, Some("goto"), Arc::clone(&handler))
        .on(Kind::Speech, Some("say"), Arc::clone(&handler))
        .on(Kind::Config, None, Arc::clone(&handler))
        .on(Kind::FaceDetection, None, Arc::clone(&handler))
        .fallback(handler)
}

// =============================================================================
// CONNECTION EVENTS
// =============================================================================

struct LinkListener {
    info: RobotInfo,
}

impl ConnectionListener for LinkListener {
    fn on_connected(&self, channel: &Channel) {
        info!(url = %channel.url(), "bridge: connected, announcing robot");
        if let Err(e) = channel.send(&Message::robot_info(&self.info)) {
            warn!(error = %e, "bridge: robot_info not sent");
        }
    }

    fn on_disconnected(&self) {
        info!("bridge: disconnected");
    }

    fn on_reconnect_failed(&self) {
        error!("bridge: server unreachable, giving up until reconnect is requested");
    }
}

// =============================================================================
// FRAMES
// =============================================================================

struct FrameForwarder {
    channel: Channel,
}

impl FrameListener for FrameForwarder {
    fn on_frame(&self, frame: BinaryFrame) {
        if !self.channel.is_connected() {
            debug!(len = frame.len(), "bridge: channel down, dropping frame");
            return;
        }
        let sent = self
            .channel
            .send_binary(&frame)
            .and_then(|()| self.channel.send(&Message::frame_timestamp(&frame)));
        if let Err(e) = sent {
            debug!(error = %e, "bridge: frame not sent");
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

struct Executor {
    focus: Focus,
    channel: Channel,
}

#[async_trait]
impl CommandHandler for Executor {
    async fn handle(&self, command: Command) -> Result<(), HandlerError> {
        match command {
            Command::Say { text, with_animation } => self.say(&text, with_animation).await,
            Command::Animate { animation } => {
                info!(%animation, "bridge: animate");
                Ok(self.focus.robot()?.animate(&animation).await?)
            }
            Command::GoTo { x, y, theta } => {
                info!(x, y, theta, "bridge: go to");
                Ok(self.focus.robot()?.go_to(x, y, theta).await?)
            }
            Command::Configure { websocket_url } => self.configure(websocket_url.as_deref()),
            Command::FaceDetection(payload) => {
                info!(fields = payload.len(), "bridge: face detection received");
                Ok(())
            }
            Command::Unrecognized { kind, action, payload } => self.unrecognized(&kind, action.as_deref(), &payload).await,
        }
    }
}

impl Executor {
    async fn say(&self, text: &str, with_animation: bool) -> Result<(), HandlerError> {
        if text.is_empty() {
            debug!("bridge: empty say ignored");
            return Ok(());
        }
        info!(%text, with_animation, "bridge: say");
        self.report("say", CommandStatus::Started, text);

        let result = match self.focus.robot() {
            Ok(robot) if with_animation => robot.say_with_animation(text).await,
            Ok(robot) => robot.say(text).await,
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(()) => CommandStatus::Completed,
            Err(RobotError::Cancelled) => CommandStatus::Cancelled,
            Err(_) => CommandStatus::Error,
        };
        self.report("say", status, text);
        Ok(result?)
    }

    fn configure(&self, websocket_url: Option<&str>) -> Result<(), HandlerError> {
        let Some(url) = websocket_url.filter(|url| !url.is_empty()) else {
            debug!("bridge: config without websocket_url");
            return Ok(());
        };
        if url == self.channel.url() {
            debug!(%url, "bridge: websocket_url unchanged");
            return Ok(());
        }
        Ok(self.channel.set_url(url)?)
    }

    async fn unrecognized(&self, kind: &Kind, action: Option<&str>, payload: &Payload) -> Result<(), HandlerError> {
        if kind.as_str() == LEGACY_SPEAK {
            if let Some(text) = payload.get("text").and_then(serde_json::Value::as_str) {
                let with_animation = payload.get("with_animation").and_then(serde_json::Value::as_bool).unwrap_or(false);
                return self.say(text, with_animation).await;
            }
        }
        info!(%kind, action = action.unwrap_or("-"), "bridge: unhandled message");
        Ok(())
    }

    fn report(&self, action: &str, status: CommandStatus, text: &str) {
        if let Err(e) = self.channel.send(&Message::command_status(action, status, text)) {
            debug!(error = %e, status = status.as_str(), "bridge: command_status not sent");
        }
    }
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod tests;
