//! Inbound command routing.
//!
//! DESIGN
//! ======
//! Inbound messages are classified into a typed `Command` and dispatched
//! by `(kind, action)` to a registered handler. A route registered with
//! `action = None` matches every action of its kind.
//!
//! Routing rules:
//! - unknown kind            → fallback handler (forward compatibility)
//! - unknown action          → logged, ignored
//! - invalid payload         → logged, ignored
//! - handler error or panic  → logged, reported as `Outcome::Failed`
//!
//! LIFECYCLE
//! =========
//! `spawn` moves the router onto one worker task that drains the inbound
//! queue in arrival order. Each handler call runs in its own task and is
//! awaited before the next message is taken, so commands never overlap
//! and a panicking handler never takes the worker down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use frames::{Kind, Message, Payload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::ChannelError;
use crate::robot::RobotError;

// =============================================================================
// COMMANDS
// =============================================================================

/// A command the robot knows how to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say { text: String, with_animation: bool },
    Animate { animation: String },
    GoTo { x: f64, y: f64, theta: f64 },
    /// Runtime configuration. `websocket_url` moves the channel.
    Configure { websocket_url: Option<String> },
    FaceDetection(Payload),
    /// Kind or action this build does not interpret.
    Unrecognized { kind: Kind, action: Option<String>, payload: Payload },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("`{0}` message has no action")]
    MissingAction(Kind),
    #[error("`{action}` needs a `{field}` field")]
    MissingField { action: String, field: &'static str },
}

impl Command {
    /// Interpret a message. Unknown kinds and actions parse as
    /// `Unrecognized`; only a known action with a bad payload fails.
    pub fn parse(message: &Message) -> Result<Self, CommandError> {
        let kind = message.kind();
        match (kind, message.action()) {
            (Kind::Command | Kind::Speech, None) => Err(CommandError::MissingAction(kind.clone())),
            (Kind::Command | Kind::Speech, Some(action @ "say")) => Ok(Self::Say {
                text: required_str(message, action, "text")?,
                // `speech` is always animated; only `command` honours the flag.
                with_animation: *kind == Kind::Speech || message.bool_field("with_animation").unwrap_or(false),
            }),
            (Kind::Command, Some(action @ "animate")) => {
                Ok(Self::Animate { animation: required_str(message, action, "animation")? })
            }
            (Kind::Command, Some(action @ "goto")) => Ok(Self::GoTo {
                x: required_f64(message, action, "x")?,
                y: required_f64(message, action, "y")?,
                theta: required_f64(message, action, "theta")?,
            }),
            (Kind::Config, _) => {
                Ok(Self::Configure { websocket_url: message.str_field("websocket_url").map(str::to_owned) })
            }
            (Kind::FaceDetection, _) => Ok(Self::FaceDetection(message.payload().clone())),
            (_, action) => Ok(Self::Unrecognized {
                kind: kind.clone(),
                action: action.map(str::to_owned),
                payload: message.payload().clone(),
            }),
        }
    }
}

fn required_str(message: &Message, action: &str, field: &'static str) -> Result<String, CommandError> {
    message
        .str_field(field)
        .map(str::to_owned)
        .ok_or_else(|| CommandError::MissingField { action: action.to_owned(), field })
}

fn required_f64(message: &Message, action: &str, field: &'static str) -> Result<f64, CommandError> {
    message.f64_field(field).ok_or_else(|| CommandError::MissingField { action: action.to_owned(), field })
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("robot: {0}")]
    Robot(#[from] RobotError),
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler task cancelled")]
    Cancelled,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Result<(), HandlerError>;
}

/// What happened to one routed message.
#[derive(Debug)]
pub enum Outcome {
    Handled,
    /// Dropped without running a handler.
    Ignored(Ignored),
    Failed(HandlerError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Ignored {
    NoRoute,
    Invalid(CommandError),
}

// =============================================================================
// ROUTER
// =============================================================================

type RouteKey = (Kind, Option<String>);

#[derive(Default)]
pub struct CommandRouter {
    routes: HashMap<RouteKey, Arc<dyn CommandHandler>>,
    fallback: Option<Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind` and `action`. `None` matches any action.
    #[must_use]
    pub fn on(mut self, kind: Kind, action: Option<&str>, handler: Arc<dyn CommandHandler>) -> Self {
        self.routes.insert((kind, action.map(str::to_owned)), handler);
        self
    }

    /// Handler for messages of unrecognised kind.
    #[must_use]
    pub fn fallback(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Classify and dispatch one message. Never panics, never fails.
    pub async fn route(&self, message: Message) -> Outcome {
        let kind = message.kind().clone();
        let action = message.action().map(str::to_owned);

        let Some(handler) = self.handler_for(&kind, action.as_deref()) else {
            info!(%kind, action = action.as_deref().unwrap_or("-"), "router: no handler, ignoring");
            return Outcome::Ignored(Ignored::NoRoute);
        };

        let command = match Command::parse(&message) {
            Ok(command) => command,
            Err(e) => {
                warn!(%kind, error = %e, "router: invalid command payload");
                return Outcome::Ignored(Ignored::Invalid(e));
            }
        };

        debug!(%kind, action = action.as_deref().unwrap_or("-"), "router: dispatching");
        let handler = Arc::clone(handler);
        let joined = tokio::spawn(async move { handler.handle(command).await }).await;

        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(HandlerError::Cancelled),
        };

        match result {
            Ok(()) => Outcome::Handled,
            Err(e) => {
                warn!(%kind, action = action.as_deref().unwrap_or("-"), error = %e, "router: handler failed");
                Outcome::Failed(e)
            }
        }
    }

    /// Drain `inbound` on a dedicated worker until the queue closes.
    pub fn spawn(self, mut inbound: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(routes = self.routes.len(), "router: worker started");
            while let Some(message) = inbound.recv().await {
                self.route(message).await;
            }
            info!("router: inbound queue closed, worker stopping");
        })
    }

    fn handler_for(&self, kind: &Kind, action: Option<&str>) -> Option<&Arc<dyn CommandHandler>> {
        if matches!(kind, Kind::Unknown(_)) {
            return self.fallback.as_ref();
        }
        if let Some(action) = action {
            if let Some(handler) = self.routes.get(&(kind.clone(), Some(action.to_owned()))) {
                return Some(handler);
            }
        }
        self.routes.get(&(kind.clone(), None))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
