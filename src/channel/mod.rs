//! Reconnecting WebSocket channel to the control server.
//!
//! DESIGN
//! ======
//! `Channel` is a cheap handle over shared state. Every state change goes
//! through `Shared::handle`, which applies one lifecycle event under the
//! lock and performs the returned effects. Listener callbacks run after
//! the lock is released so they may call back into the channel.
//!
//! Each connection attempt gets a fresh generation number and its own
//! task. A task only reports events tagged with its generation; once the
//! connection is replaced or closed by the caller, anything the old task
//! reports is ignored.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` opens a transport under `connect_timeout`
//! 2. on open: retry counter reset, `on_connected`, first ping
//! 3. while open: queued frames are written (each under `write_timeout`),
//!    text frames are parsed and forwarded, pings go out every
//!    `ping_interval`, silence longer than `read_timeout` is a dead link
//! 4. close 1000 ends the session; anything else schedules a reconnect
//!
//! ERROR HANDLING
//! ==============
//! Transport errors never surface to callers. They are logged and turned
//! into lifecycle events. Unparsable text frames are logged and dropped
//! without touching the connection.

pub mod retry;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use frames::{BinaryFrame, CLOSE_ABNORMAL, CLOSE_NORMAL, Kind, Message};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, ConfigError, validate_url};

pub use retry::RetryPolicy;
pub use state::{ConnectionState, Effect, Event, Lifecycle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DISCONNECT_REASON: &str = "Disconnect requested";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("websocket error: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

/// Connection notifications. Called outside the channel lock.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self, _channel: &Channel) {}
    fn on_disconnected(&self) {}
    /// Retries ran out. The channel stays closed until `connect` is called.
    fn on_reconnect_failed(&self) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

struct Shared {
    config: Mutex<ChannelConfig>,
    inner: Mutex<Inner>,
    listener: Arc<dyn ConnectionListener>,
    inbound: mpsc::UnboundedSender<Message>,
    runtime: Handle,
}

struct Inner {
    lifecycle: Lifecycle,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    reconnect: Option<JoinHandle<()>>,
    last_pong: Option<Instant>,
}

impl Channel {
    /// Build an idle channel. Inbound messages arrive on the returned queue.
    ///
    /// Must be called from inside a tokio runtime; background tasks are
    /// spawned on it.
    pub fn new(
        config: ChannelConfig,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Message>), ChannelError> {
        validate_url(&config.server_url)?;
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            lifecycle: Lifecycle::new(config.retry),
            generation: 0,
            outbound: None,
            reconnect: None,
            last_pong: None,
        };
        let shared = Arc::new(Shared {
            config: Mutex::new(config),
            inner: Mutex::new(inner),
            listener,
            inbound,
            runtime,
        });

        Ok((Self { shared }, inbound_rx))
    }

    /// Start connecting. No-op while connecting or open.
    pub fn connect(&self) {
        self.shared.handle(None, Event::Connect);
    }

    /// Close with code 1000 and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.shared.handle(None, Event::Disconnect);
    }

    /// Point the channel at a new server and reconnect to it.
    pub fn set_url(&self, url: &str) -> Result<(), ChannelError> {
        validate_url(url)?;
        info!(%url, "channel: server url changed");
        self.shared.config().server_url = url.to_owned();
        self.disconnect();
        self.connect();
        Ok(())
    }

    /// Queue a text message. Never blocks.
    pub fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.shared.enqueue(WsMessage::Text(frames::encode_message(message).into()))
    }

    /// Queue a binary frame. Never blocks.
    pub fn send_binary(&self, frame: &BinaryFrame) -> Result<(), ChannelError> {
        self.shared.enqueue(WsMessage::Binary(frame.data().to_vec().into()))
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().lifecycle.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.shared.lock().lifecycle.retry_count()
    }

    /// When the last `pong` arrived on the current connection.
    #[must_use]
    pub fn last_pong(&self) -> Option<Instant> {
        self.shared.lock().last_pong
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.shared.config().server_url.clone()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("url", &self.url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// EFFECTS
// =============================================================================

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> MutexGuard<'_, ChannelConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, frame: WsMessage) -> Result<(), ChannelError> {
        let inner = self.lock();
        if inner.lifecycle.state() != ConnectionState::Open {
            return Err(ChannelError::NotConnected);
        }
        let outbound = inner.outbound.as_ref().ok_or(ChannelError::NotConnected)?;
        outbound.send(frame).map_err(|_| ChannelError::NotConnected)
    }

    /// Apply one event. `generation` is `None` for caller-issued events and
    /// the connection's generation for transport events.
    fn handle(self: &Arc<Self>, generation: Option<u64>, event: Event) {
        let notices = {
            let mut inner = self.lock();
            if generation.is_some_and(|g| g != inner.generation) {
                debug!(?event, "channel: ignoring event from replaced connection");
                return;
            }

            let before = inner.lifecycle.state();
            let effects = inner.lifecycle.apply(event);
            let after = inner.lifecycle.state();
            if before != after {
                debug!(from = before.as_str(), to = after.as_str(), ?event, "channel: state change");
            }

            let mut notices = Vec::new();
            for effect in effects {
                match effect {
                    Effect::OpenTransport => self.open_transport(&mut inner),
                    Effect::CloseTransport => close_transport(&mut inner),
                    Effect::CancelReconnect => {
                        if let Some(timer) = inner.reconnect.take() {
                            timer.abort();
                        }
                    }
                    Effect::ScheduleReconnect { attempt, delay } => {
                        self.schedule_reconnect(&mut inner, attempt, delay);
                    }
                    Effect::SendPing => {
                        if let Some(outbound) = &inner.outbound {
                            let _ = outbound.send(ping_frame());
                        }
                    }
                    Effect::NotifyConnected | Effect::NotifyDisconnected | Effect::NotifyReconnectFailed => {
                        notices.push(effect);
                    }
                }
            }

            if !after.is_active() {
                inner.outbound = None;
            }
            notices
        };

        for notice in notices {
            match notice {
                Effect::NotifyConnected => {
                    self.listener.on_connected(&Channel { shared: Arc::clone(self) });
                }
                Effect::NotifyDisconnected => self.listener.on_disconnected(),
                Effect::NotifyReconnectFailed => {
                    warn!("channel: retries exhausted, giving up until connect is called");
                    self.listener.on_reconnect_failed();
                }
                _ => {}
            }
        }
    }

    fn open_transport(self: &Arc<Self>, inner: &mut Inner) {
        inner.generation += 1;
        inner.last_pong = None;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        inner.outbound = Some(outbound);

        let config = self.config().clone();
        self.runtime
            .spawn(run_connection(Arc::downgrade(self), inner.generation, config, outbound_rx));
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner, attempt: u32, delay: Duration) {
        if let Some(previous) = inner.reconnect.take() {
            previous.abort();
        }
        info!(attempt, delay_ms = delay.as_millis(), "channel: reconnect scheduled");

        let weak = Arc::downgrade(self);
        let generation = inner.generation;
        inner.reconnect = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            dispatch(&weak, generation, Event::BackoffElapsed);
        }));
    }

    fn record_pong(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.last_pong = Some(Instant::now());
        }
    }

    fn reply(&self, generation: u64, frame: WsMessage) {
        let inner = self.lock();
        if inner.generation == generation {
            if let Some(outbound) = &inner.outbound {
                let _ = outbound.send(frame);
            }
        }
    }
}

/// Queue a normal close and detach the current connection.
fn close_transport(inner: &mut Inner) {
    if let Some(outbound) = inner.outbound.take() {
        let frame = CloseFrame { code: CloseCode::Normal, reason: DISCONNECT_REASON.to_owned().into() };
        let _ = outbound.send(WsMessage::Close(Some(frame)));
    }
    inner.generation += 1;
    inner.last_pong = None;
}

fn dispatch(shared: &Weak<Shared>, generation: u64, event: Event) {
    if let Some(shared) = shared.upgrade() {
        shared.handle(Some(generation), event);
    }
}

fn ping_frame() -> WsMessage {
    WsMessage::Text(frames::encode_message(&Message::ping()).into())
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn run_connection(
    shared: Weak<Shared>,
    generation: u64,
    config: ChannelConfig,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
) {
    let url = config.server_url.clone();
    info!(%url, generation, "channel: connecting");

    let stream = match open_stream(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%url, error = %e, "channel: connect failed");
            dispatch(&shared, generation, Event::TransportFailure);
            return;
        }
    };

    info!(%url, generation, "channel: connected");
    dispatch(&shared, generation, Event::TransportOpen);

    let last = pump(&shared, generation, &config, stream, &mut outbound).await;
    debug!(generation, ?last, "channel: connection ended");
    dispatch(&shared, generation, last);
}

async fn open_stream(config: &ChannelConfig) -> Result<WsStream, ChannelError> {
    let connect = tokio_tungstenite::connect_async(config.server_url.as_str());
    match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(ChannelError::Transport(Box::new(e))),
        Err(_) => Err(ChannelError::ConnectTimeout(config.connect_timeout)),
    }
}

/// Move frames both ways until the connection ends. Returns the final
/// lifecycle event for this connection.
async fn pump(
    shared: &Weak<Shared>,
    generation: u64,
    config: &ChannelConfig,
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<WsMessage>,
) -> Event {
    let (mut sink, mut source) = stream.split();

    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut read_deadline = Instant::now() + config.read_timeout;
    let mut close_code: Option<u16> = None;

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(frame) = queued else {
                    // Detached by the caller; the close frame went out already.
                    let _ = sink.close().await;
                    return Event::Closed(CLOSE_NORMAL);
                };
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = write(&mut sink, frame, config.write_timeout).await {
                    warn!(error = %e, "channel: write failed");
                    return Event::TransportFailure;
                }
                if closing {
                    let _ = sink.close().await;
                    return Event::Closed(CLOSE_NORMAL);
                }
            }

            read = source.next() => {
                read_deadline = Instant::now() + config.read_timeout;
                match read {
                    None => return Event::Closed(close_code.unwrap_or(CLOSE_ABNORMAL)),
                    Some(Err(e)) => {
                        if let Some(code) = close_code {
                            return Event::Closed(code);
                        }
                        warn!(error = %e, "channel: read failed");
                        return Event::TransportFailure;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map_or(1005, |f| u16::from(f.code));
                        info!(code, "channel: close received");
                        close_code = Some(code);
                        dispatch(shared, generation, Event::CloseReceived(code));
                    }
                    Some(Ok(frame)) => receive(shared, generation, frame),
                }
            }

            () = tokio::time::sleep_until(read_deadline) => {
                warn!(timeout_ms = config.read_timeout.as_millis(), "channel: read timeout, connection presumed dead");
                return Event::Closed(CLOSE_ABNORMAL);
            }

            // Peer already closed; only its stream end is awaited now.
            _ = ping.tick(), if close_code.is_none() => {
                if let Err(e) = write(&mut sink, ping_frame(), config.write_timeout).await {
                    warn!(error = %e, "channel: ping failed");
                    return Event::TransportFailure;
                }
            }
        }
    }
}

async fn write<S>(sink: &mut S, frame: WsMessage, limit: Duration) -> Result<(), ChannelError>
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(frame)).await {
        Ok(result) => result.map_err(|e| ChannelError::Transport(Box::new(e))),
        Err(_) => Err(ChannelError::Transport(Box::new(tokio_tungstenite::tungstenite::Error::Io(
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"),
        )))),
    }
}

/// Handle one non-close frame from the server.
fn receive(shared: &Weak<Shared>, generation: u64, frame: WsMessage) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    match frame {
        WsMessage::Text(text) => match frames::decode_message(text.as_str()) {
            Ok(message) => match message.kind() {
                Kind::Pong => shared.record_pong(generation),
                Kind::Ping => {
                    let pong = WsMessage::Text(frames::encode_message(&Message::pong()).into());
                    shared.reply(generation, pong);
                }
                _ => {
                    if shared.inbound.send(message).is_err() {
                        debug!("channel: inbound queue closed, dropping message");
                    }
                }
            },
            Err(e) => warn!(error = %e, len = text.len(), "channel: dropping unparsable message"),
        },
        WsMessage::Binary(bytes) => debug!(len = bytes.len(), "channel: ignoring binary message from server"),
        // Protocol-level ping/pong is answered by tungstenite.
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Close(_) => {}
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
