//! Shared message model for the robot link.
//!
//! This crate owns the wire representation used by both the robot-side
//! channel (`pepperlink`) and the control `server`. Text frames carry a JSON
//! object discriminated by its `type` field; binary frames carry raw image
//! bytes with no envelope.
//!
//! DESIGN
//! ======
//! - `Kind` is a closed sum type over every known tag, with `Unknown`
//!   carrying the raw tag so newer servers never break older robots.
//! - Payload stays flexible (`Map<String, Value>`); typed interpretation is
//!   the router's job, not the codec's.
//! - Messages are immutable once built. Builders return owned values.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// CLOSE CODES
// =============================================================================

/// Caller-initiated, clean shutdown. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Connection dropped without a close frame (reserved code, never sent).
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Whether a close code counts as a normal closure.
#[must_use]
pub fn is_normal_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Discriminator key on every text frame.
pub const FIELD_TYPE: &str = "type";

/// Action selector inside `command` / `speech` messages.
pub const FIELD_ACTION: &str = "action";

/// Milliseconds since the Unix epoch.
pub const FIELD_TIMESTAMP: &str = "timestamp";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_message`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The text is not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The object has no `type` field.
    #[error("message has no `type` field")]
    MissingType,
    /// The `type` field is present but not a string.
    #[error("message `type` must be a string, got {0}")]
    InvalidType(Value),
}

// =============================================================================
// KIND
// =============================================================================

/// Discriminator tag of a text message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Remote command (`action` selects the operation).
    Command,
    /// Server-generated speech (`action: "say"`).
    Speech,
    /// Face detection result pushed by the server.
    FaceDetection,
    /// Runtime configuration (e.g. `websocket_url`).
    Config,
    /// Liveness probe.
    Ping,
    /// Liveness probe answer.
    Pong,
    /// Free-form status update.
    Status,
    /// Robot clock report.
    Timestamp,
    /// Robot identity, sent on every connect.
    RobotInfo,
    /// The robot switched to a different speaker.
    SpeakerChange,
    /// Progress of a previously received command.
    CommandStatus,
    /// Metadata for the binary frame sent just before it.
    FrameTimestamp,
    /// Any tag this build does not know. Carries the raw tag.
    Unknown(String),
}

impl Kind {
    /// Wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Command => "command",
            Self::Speech => "speech",
            Self::FaceDetection => "face_detection",
            Self::Config => "config",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Status => "status",
            Self::Timestamp => "timestamp",
            Self::RobotInfo => "robot_info",
            Self::SpeakerChange => "speaker_change",
            Self::CommandStatus => "command_status",
            Self::FrameTimestamp => "frameTimestamp",
            Self::Unknown(tag) => tag,
        }
    }

    /// Parse a wire tag. Never fails: unknown tags map to [`Kind::Unknown`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "command" => Self::Command,
            "speech" => Self::Speech,
            "face_detection" => Self::FaceDetection,
            "config" => Self::Config,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "status" => Self::Status,
            "timestamp" => Self::Timestamp,
            "robot_info" => Self::RobotInfo,
            "speaker_change" => Self::SpeakerChange,
            "command_status" => Self::CommandStatus,
            "frameTimestamp" => Self::FrameTimestamp,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Kinds the robot produces (telemetry towards the server).
    #[must_use]
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            Self::Status
                | Self::Timestamp
                | Self::RobotInfo
                | Self::SpeakerChange
                | Self::CommandStatus
                | Self::FrameTimestamp
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Payload = Map<String, Value>;

/// One text message on the wire: a kind plus its kind-specific payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    kind: Kind,
    payload: Payload,
}

impl Message {
    #[must_use]
    pub fn new(kind: Kind, payload: Payload) -> Self {
        let mut payload = payload;
        payload.remove(FIELD_TYPE);
        Self { kind, payload }
    }

    /// Return a copy with one extra payload field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != FIELD_TYPE {
            self.payload.insert(key.to_owned(), value.into());
        }
        self
    }

    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The `action` field, if present and a string.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.str_field(FIELD_ACTION)
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn into_parts(self) -> (Kind, Payload) {
        (self.kind, self.payload)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Identity the robot announces after each successful connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotInfo {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Attributes of the human the robot is currently talking to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub gender: String,
    pub age: u32,
    pub emotion: String,
}

/// Progress of a command executed on the robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Started,
    Completed,
    Cancelled,
    Error,
}

impl CommandStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl Message {
    /// Liveness probe. Carries the send time so the peer can measure latency.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(Kind::Ping, Payload::new()).with_field(FIELD_TIMESTAMP, now_ms())
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(Kind::Pong, Payload::new())
    }

    /// Robot clock report.
    #[must_use]
    pub fn timestamp() -> Self {
        Self::new(Kind::Timestamp, Payload::new()).with_field(FIELD_TIMESTAMP, now_ms())
    }

    #[must_use]
    pub fn robot_info(info: &RobotInfo) -> Self {
        Self::new(Kind::RobotInfo, Payload::new())
            .with_field("name", info.name.clone())
            .with_field("version", info.version.clone())
            .with_field("capabilities", info.capabilities.clone())
            .with_field(FIELD_TIMESTAMP, now_ms())
    }

    #[must_use]
    pub fn speaker_change(speaker: &SpeakerProfile) -> Self {
        Self::new(Kind::SpeakerChange, Payload::new())
            .with_field("gender", speaker.gender.clone())
            .with_field("age", speaker.age)
            .with_field("emotion", speaker.emotion.clone())
            .with_field(FIELD_TIMESTAMP, now_ms())
    }

    #[must_use]
    pub fn command_status(action: &str, status: CommandStatus, text: &str) -> Self {
        Self::new(Kind::CommandStatus, Payload::new())
            .with_field(FIELD_ACTION, action)
            .with_field("status", status.as_str())
            .with_field("text", text)
            .with_field(FIELD_TIMESTAMP, now_ms())
    }

    /// Metadata for a binary frame, sent right after the frame itself.
    #[must_use]
    pub fn frame_timestamp(frame: &BinaryFrame) -> Self {
        Self::new(Kind::FrameTimestamp, Payload::new())
            .with_field(FIELD_TIMESTAMP, frame.captured_at_ms())
            .with_field("size", frame.len())
    }

    /// A `command` message for the robot: `{"type":"command","action":..,..params}`.
    #[must_use]
    pub fn command(action: &str, params: Payload) -> Self {
        Self::new(Kind::Command, params).with_field(FIELD_ACTION, action)
    }
}

// =============================================================================
// BINARY FRAME
// =============================================================================

/// Opaque captured bytes plus capture time. Sent as one binary message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryFrame {
    data: Vec<u8>,
    captured_at_ms: i64,
}

impl BinaryFrame {
    /// Wrap bytes captured just now.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, captured_at_ms: now_ms() }
    }

    #[must_use]
    pub fn with_timestamp(data: Vec<u8>, captured_at_ms: i64) -> Self {
        Self { data, captured_at_ms }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a message as a JSON text frame.
#[must_use]
pub fn encode_message(message: &Message) -> String {
    let mut object = message.payload.clone();
    object.insert(FIELD_TYPE.to_owned(), Value::String(message.kind.as_str().to_owned()));
    Value::Object(object).to_string()
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns [`ParseError`] when the text is not a JSON object with a string
/// `type` field. Unknown tags are not an error.
pub fn decode_message(text: &str) -> Result<Message, ParseError> {
    let Value::Object(mut object) = serde_json::from_str::<Value>(text)? else {
        return Err(ParseError::NotAnObject);
    };

    let kind = match object.remove(FIELD_TYPE) {
        Some(Value::String(tag)) => Kind::from_tag(&tag),
        Some(other) => return Err(ParseError::InvalidType(other)),
        None => return Err(ParseError::MissingType),
    };

    Ok(Message { kind, payload: object })
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
