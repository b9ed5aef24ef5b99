//! Robot link: a reconnecting WebSocket channel between a robot and its
//! control server, with periodic frame capture, chunked transfer of large
//! device buffers, and routing of inbound commands to robot actions.
//!
//! ```text
//! RobotActions ─take_picture─▶ ChunkedReader ─▶ CaptureLoop ─▶ Channel ─▶ server
//!      ▲                                                          │
//!      └──────────────── CommandRouter ◀──── inbound queue ◀──────┘
//! ```

pub mod bridge;
pub mod capture;
pub mod channel;
pub mod chunked;
pub mod config;
pub mod robot;
pub mod router;

pub use bridge::{Bridge, BridgeError};
pub use capture::{CaptureError, CaptureLoop, CaptureState, FrameListener, FrameSource, RobotCamera};
pub use channel::{Channel, ChannelError, ConnectionListener, ConnectionState, NoopListener, RetryPolicy};
pub use chunked::{ChunkError, ChunkedReader, StreamableBuffer, StreamableObject};
pub use config::{CaptureConfig, ChannelConfig, ConfigError, LinkConfig};
pub use robot::{Focus, RobotActions, RobotError, SimulatedRobot};
pub use router::{Command, CommandHandler, CommandRouter, HandlerError};
