use super::*;
use crate::robot::SimulatedRobot;
use std::sync::atomic::AtomicUsize;
use tokio::time::sleep;

/// Source that sleeps per capture and records the peak concurrency.
struct SlowSource {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowSource {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FrameSource for SlowSource {
    async fn capture(&self) -> Result<BinaryFrame, CaptureError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(BinaryFrame::new(vec![1, 2, 3]))
    }
}

struct FailingSource;

#[async_trait]
impl FrameSource for FailingSource {
    async fn capture(&self) -> Result<BinaryFrame, CaptureError> {
        Err(CaptureError::Robot(RobotError::Failed("camera unplugged".into())))
    }
}

fn counting_listener() -> (Arc<dyn FrameListener>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let listener: Arc<dyn FrameListener> = Arc::new(move |_frame: BinaryFrame| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (listener, count)
}

#[tokio::test]
async fn delivers_frames_while_running() {
    let source = SlowSource::new(Duration::ZERO);
    let (listener, count) = counting_listener();
    let capture = CaptureLoop::new(source, listener, Duration::from_millis(10));

    capture.start().unwrap();
    assert_eq!(capture.state(), CaptureState::Running);
    sleep(Duration::from_millis(120)).await;
    capture.stop();

    assert!(count.load(Ordering::SeqCst) >= 3);
    assert_eq!(capture.frames_delivered() as usize, count.load(Ordering::SeqCst));
    assert_eq!(capture.state(), CaptureState::Stopped);
}

#[tokio::test]
async fn slow_capture_never_overlaps() {
    let source = SlowSource::new(Duration::from_millis(60));
    let (listener, _count) = counting_listener();
    let capture = CaptureLoop::new(Arc::clone(&source) as Arc<dyn FrameSource>, listener, Duration::from_millis(10));

    capture.start().unwrap();
    sleep(Duration::from_millis(400)).await;
    capture.stop();

    assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    assert!(capture.ticks_skipped() > 0);
    assert!(source.calls.load(Ordering::SeqCst) <= 8);
}

#[tokio::test]
async fn pause_suppresses_and_resume_restores_delivery() {
    let source = SlowSource::new(Duration::ZERO);
    let (listener, count) = counting_listener();
    let capture = CaptureLoop::new(source, listener, Duration::from_millis(10));

    capture.start().unwrap();
    sleep(Duration::from_millis(60)).await;
    capture.pause();
    assert_eq!(capture.state(), CaptureState::Paused);
    sleep(Duration::from_millis(20)).await;

    let paused_at = count.load(Ordering::SeqCst);
    sleep(Duration::from_millis(80)).await;
    assert_eq!(count.load(Ordering::SeqCst), paused_at);

    capture.resume();
    sleep(Duration::from_millis(80)).await;
    assert!(count.load(Ordering::SeqCst) > paused_at);
    capture.stop();
}

#[tokio::test]
async fn start_twice_keeps_one_task() {
    let source = SlowSource::new(Duration::from_millis(30));
    let (listener, _count) = counting_listener();
    let capture = CaptureLoop::new(Arc::clone(&source) as Arc<dyn FrameSource>, listener, Duration::from_millis(5));

    capture.start().unwrap();
    capture.start().unwrap();
    sleep(Duration::from_millis(150)).await;
    capture.stop();

    assert_eq!(source.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failures_are_counted_and_schedule_continues() {
    let (listener, count) = counting_listener();
    let capture = CaptureLoop::new(Arc::new(FailingSource), listener, Duration::from_millis(10));

    capture.start().unwrap();
    sleep(Duration::from_millis(80)).await;
    capture.stop();

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(capture.captures_failed() >= 2);
}

#[tokio::test]
async fn released_loop_refuses_to_start() {
    let (listener, _count) = counting_listener();
    let capture = CaptureLoop::new(SlowSource::new(Duration::ZERO), listener, Duration::from_millis(10));

    capture.start().unwrap();
    capture.release();

    assert_eq!(capture.state(), CaptureState::Released);
    assert!(matches!(capture.start(), Err(CaptureError::Released)));
}

#[tokio::test]
async fn robot_camera_pages_picture_out() {
    let focus = Focus::acquire(Arc::new(SimulatedRobot::new(5000, Duration::ZERO)));
    let camera = RobotCamera::new(focus.clone(), ChunkedReader::new(1024).unwrap());

    let frame = camera.capture().await.unwrap();
    assert_eq!(frame.len(), 5000);
    assert!(frame.captured_at_ms() > 0);

    focus.release();
    assert!(matches!(camera.capture().await, Err(CaptureError::Robot(RobotError::FocusLost))));
}

#[test]
fn start_outside_runtime_fails() {
    let (listener, _count) = counting_listener();
    let capture = CaptureLoop::new(SlowSource::new(Duration::ZERO), listener, Duration::from_millis(10));
    assert!(matches!(capture.start(), Err(CaptureError::NoRuntime)));
}
