//! Connection lifecycle state machine.
//!
//! DESIGN
//! ======
//! `Lifecycle::apply` is pure: it takes one event, moves the state, and
//! returns the side effects the driver must perform. It never touches a
//! socket or a timer, so every row of the transition table is unit tested
//! without a network.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open ──disconnect──▶ Closed
//!                      │                  │ └─close frame─▶ Closing ──closed(1000)──▶ Closed
//!                      │ failure          │ failure / closed(≠1000)
//!                      ▼                  ▼
//!                   ClosedAbnormal ◀──────┘ ──backoff elapsed──▶ Connecting
//! ```
//!
//! The retry counter is incremented before each delay is computed and is
//! reset only by a successful open.

use std::time::Duration;

use frames::is_normal_close;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Peer sent a close frame; waiting for the transport to finish.
    Closing,
    /// Closed normally. No reconnect is pending.
    Closed,
    /// Closed by failure. A reconnect is pending unless retries ran out.
    ClosedAbnormal,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::ClosedAbnormal => "closed_abnormal",
        }
    }

    /// Whether a transport for this state is live or being set up.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Closing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Caller asked to connect.
    Connect,
    /// Handshake completed.
    TransportOpen,
    /// Connect failed, I/O error, or liveness timeout.
    TransportFailure,
    /// Peer sent a close frame with this code.
    CloseReceived(u16),
    /// Transport finished closing with this code.
    Closed(u16),
    /// Caller asked to disconnect.
    Disconnect,
    /// Reconnect timer fired.
    BackoffElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    CancelReconnect,
    ScheduleReconnect { attempt: u32, delay: Duration },
    SendPing,
    NotifyConnected,
    NotifyDisconnected,
    NotifyReconnectFailed,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    retry_count: u32,
    policy: RetryPolicy,
}

impl Lifecycle {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { state: ConnectionState::Idle, retry_count: 0, policy }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Apply one event and return the effects to perform, in order.
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        use ConnectionState as S;

        match (self.state, event) {
            (S::Connecting | S::Open, Event::Connect) => Vec::new(),
            (_, Event::Connect) => {
                self.state = S::Connecting;
                vec![Effect::CancelReconnect, Effect::OpenTransport]
            }

            (S::Connecting, Event::TransportOpen) => {
                self.state = S::Open;
                self.retry_count = 0;
                vec![Effect::CancelReconnect, Effect::NotifyConnected, Effect::SendPing]
            }

            (S::Connecting | S::Open | S::Closing, Event::TransportFailure) => self.fail(),

            (S::Open, Event::CloseReceived(_)) => {
                self.state = S::Closing;
                Vec::new()
            }

            (S::Connecting | S::Open | S::Closing, Event::Closed(code)) if is_normal_close(code) => {
                self.state = S::Closed;
                vec![Effect::NotifyDisconnected]
            }
            (S::Connecting | S::Open | S::Closing, Event::Closed(_)) => self.fail(),

            (state, Event::Disconnect) => {
                self.state = S::Closed;
                let mut effects = vec![Effect::CancelReconnect];
                if state.is_active() {
                    effects.push(Effect::CloseTransport);
                }
                if matches!(state, S::Open | S::Closing) {
                    effects.push(Effect::NotifyDisconnected);
                }
                effects
            }

            (S::ClosedAbnormal, Event::BackoffElapsed) => {
                self.state = S::Connecting;
                vec![Effect::OpenTransport]
            }

            // Stale transport events and timers that lost a race.
            _ => Vec::new(),
        }
    }

    fn fail(&mut self) -> Vec<Effect> {
        self.state = ConnectionState::ClosedAbnormal;
        self.retry_count = self.retry_count.saturating_add(1);

        let next = match self.policy.next_delay(self.retry_count) {
            Some(delay) => Effect::ScheduleReconnect { attempt: self.retry_count, delay },
            None => Effect::NotifyReconnectFailed,
        };
        vec![Effect::NotifyDisconnected, next]
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
