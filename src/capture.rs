//! Periodic frame capture.
//!
//! DESIGN
//! ======
//! One task per running loop ticks every `1000 / target_fps` ms and awaits
//! the capture inline. Ticks that fire while a capture is still running are
//! dropped (`MissedTickBehavior::Skip`), so at most one capture is ever in
//! flight against the device.
//!
//! LIFECYCLE
//! =========
//! - `start`   spawn the ticking task (no-op if already running)
//! - `pause`   keep ticking, skip captures (cheap resume)
//! - `resume`  capture again on the next tick
//! - `stop`    abort the task; an in-flight capture is abandoned
//! - `release` stop for good; later `start` calls fail

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use frames::BinaryFrame;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chunked::{ChunkError, ChunkedReader};
use crate::robot::{Focus, RobotError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture loop has been released")]
    Released,
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("robot error: {0}")]
    Robot(#[from] RobotError),
    #[error("picture transfer failed: {0}")]
    Transfer(#[from] ChunkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Running,
    Paused,
    Released,
}

/// Produces one frame per call. Implementations talk to the device.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<BinaryFrame, CaptureError>;
}

/// Receives captured frames on the capture task.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: BinaryFrame);
}

impl<F> FrameListener for F
where
    F: Fn(BinaryFrame) + Send + Sync,
{
    fn on_frame(&self, frame: BinaryFrame) {
        self(frame);
    }
}

#[derive(Debug, Default)]
struct CaptureStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

// =============================================================================
// CAPTURE LOOP
// =============================================================================

pub struct CaptureLoop {
    source: Arc<dyn FrameSource>,
    listener: Arc<dyn FrameListener>,
    interval: Duration,
    paused: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    inner: Mutex<LoopInner>,
}

struct LoopInner {
    task: Option<JoinHandle<()>>,
    released: bool,
}

impl CaptureLoop {
    #[must_use]
    pub fn new(source: Arc<dyn FrameSource>, listener: Arc<dyn FrameListener>, interval: Duration) -> Self {
        Self {
            source,
            listener,
            interval: interval.max(Duration::from_millis(1)),
            paused: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::default()),
            inner: Mutex::new(LoopInner { task: None, released: false }),
        }
    }

    /// Spawn the capture task on the current tokio runtime.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut inner = self.lock();
        if inner.released {
            return Err(CaptureError::Released);
        }
        if inner.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("capture: already running");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CaptureError::NoRuntime)?;

        self.paused.store(false, Ordering::SeqCst);
        info!(interval_ms = self.interval.as_millis(), "capture: starting");
        inner.task = Some(runtime.spawn(run_capture_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.listener),
            self.interval,
            Arc::clone(&self.paused),
            Arc::clone(&self.stats),
        )));
        Ok(())
    }

    pub fn stop(&self) {
        let mut inner = self.lock();
        if let Some(task) = inner.task.take() {
            info!("capture: stopping");
            task.abort();
        }
    }

    pub fn pause(&self) {
        debug!("capture: paused");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        debug!("capture: resumed");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Stop and refuse further starts.
    pub fn release(&self) {
        self.stop();
        self.lock().released = true;
        info!("capture: released");
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        let inner = self.lock();
        if inner.released {
            return CaptureState::Released;
        }
        let running = inner.task.as_ref().is_some_and(|task| !task.is_finished());
        match (running, self.paused.load(Ordering::SeqCst)) {
            (false, _) => CaptureState::Stopped,
            (true, true) => CaptureState::Paused,
            (true, false) => CaptureState::Running,
        }
    }

    #[must_use]
    pub fn frames_delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn captures_failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Ticks dropped because a capture was still in flight.
    #[must_use]
    pub fn ticks_skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_capture_loop(
    source: Arc<dyn FrameSource>,
    listener: Arc<dyn FrameListener>,
    interval: Duration,
    paused: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let started = Instant::now();
        match source.capture().await {
            Ok(frame) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                listener.on_frame(frame);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "capture: frame capture failed");
            }
        }

        let overrun = started.elapsed().as_nanos() / interval.as_nanos().max(1);
        if overrun > 0 {
            stats.skipped.fetch_add(u64::try_from(overrun).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }
}

// =============================================================================
// ROBOT CAMERA
// =============================================================================

/// `FrameSource` that takes a picture on the robot and pages it out.
pub struct RobotCamera {
    focus: Focus,
    reader: ChunkedReader,
}

impl RobotCamera {
    #[must_use]
    pub fn new(focus: Focus, reader: ChunkedReader) -> Self {
        Self { focus, reader }
    }
}

#[async_trait]
impl FrameSource for RobotCamera {
    async fn capture(&self) -> Result<BinaryFrame, CaptureError> {
        let picture = self.focus.robot()?.take_picture().await?;
        let bytes = self.reader.read_all(picture.data.as_ref()).await?;
        Ok(BinaryFrame::with_timestamp(bytes, picture.captured_at_ms))
    }
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod tests;
