// Detection session: one background worker owns the camera and runs the frame loop

use crate::camera::{CaptureGuard, SourceFactory};
use crate::config::SessionConfig;
use crate::models::EmotionResult;
use crate::pipeline::FramePipeline;
use image::{RgbImage, RgbaImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Lifecycle of a session as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    /// The camera could not be opened
    CameraUnavailable(String),
    /// Too many consecutive read failures
    CameraLost(String),
}

impl SessionStatus {
    /// Whether the UI should offer to reinitialize the camera
    pub fn needs_reinitialize(&self) -> bool {
        matches!(
            self,
            SessionStatus::CameraUnavailable(_) | SessionStatus::CameraLost(_)
        )
    }

    pub fn text(&self) -> String {
        match self {
            SessionStatus::Stopped => "Stopped".to_string(),
            SessionStatus::Starting => "Starting".to_string(),
            SessionStatus::Running => "Running".to_string(),
            SessionStatus::CameraUnavailable(reason) => format!("Camera unavailable: {reason}"),
            SessionStatus::CameraLost(reason) => format!("Camera lost: {reason}"),
        }
    }
}

/// Notifications broadcast by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started,
    EmotionChanged(EmotionResult),
    UserRecognized(String),
    Stopped(SessionStatus),
}

/// Latest state published by the worker; last write wins
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub frame: Option<RgbImage>,
    pub panel: Option<RgbaImage>,
    pub fps: f32,
    pub face_count: usize,
    pub emotion: Option<EmotionResult>,
    pub user: String,
    pub frames_processed: u64,
}

/// Frames per second over the most recent frame times
#[derive(Debug)]
pub struct FpsCounter {
    times: VecDeque<Duration>,
    window: usize,
}

impl FpsCounter {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            times: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn record(&mut self, frame_time: Duration) {
        if self.times.len() == self.window {
            self.times.pop_front();
        }
        self.times.push_back(frame_time);
    }

    pub fn fps(&self) -> f32 {
        let total: f32 = self.times.iter().map(Duration::as_secs_f32).sum();
        if total <= 0.0 {
            0.0
        } else {
            self.times.len() as f32 / total
        }
    }
}

/// Locks shared state, recovering it if a holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the running flag when the worker exits, however it exits
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State shared between the session handle and its worker
struct Shared {
    pipeline: Arc<Mutex<FramePipeline>>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
    stop_requested: Arc<AtomicBool>,
    equalize: Arc<AtomicBool>,
    config: SessionConfig,
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        lock(&self.snapshot).status = status;
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Handle to the detection worker
pub struct DetectionSession {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DetectionSession {
    pub fn new(pipeline: Arc<Mutex<FramePipeline>>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        let equalize = Arc::new(AtomicBool::new(config.equalize_histogram));
        Self {
            shared: Arc::new(Shared {
                pipeline,
                snapshot: Arc::new(Mutex::new(SessionSnapshot::default())),
                events,
                stop_requested: Arc::new(AtomicBool::new(false)),
                equalize,
                config,
            }),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Starts a worker unless one is already running.
    ///
    /// Returns `true` when a new worker was spawned.
    pub fn start(&mut self, factory: SourceFactory) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Detection session is already running");
            return false;
        }

        // A previous worker has already cleared the flag; reap it
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Previous detection worker panicked");
            }
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.set_status(SessionStatus::Starting);

        let shared = self.shared.clone();
        let running = RunningFlag(self.running.clone());
        let spawned = std::thread::Builder::new()
            .name("detection-worker".to_string())
            .spawn(move || {
                let _running = running;
                run_worker(&shared, factory);
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                error!("Failed to spawn detection worker: {}", e);
                self.shared
                    .set_status(SessionStatus::CameraUnavailable(e.to_string()));
                false
            }
        }
    }

    /// Requests the worker to stop at the top of its next iteration
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Stops and waits for the worker to exit
    pub fn stop_and_wait(&mut self) {
        self.stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Detection worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_equalize(&self, enabled: bool) {
        self.shared.equalize.store(enabled, Ordering::SeqCst);
    }

    pub fn equalize(&self) -> bool {
        self.shared.equalize.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.shared.snapshot).clone()
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.shared.snapshot).status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn pipeline(&self) -> Arc<Mutex<FramePipeline>> {
        self.shared.pipeline.clone()
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop_and_wait();
    }
}

fn run_worker(shared: &Shared, factory: SourceFactory) {
    let source = match factory() {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to open capture source: {}", e);
            let status = SessionStatus::CameraUnavailable(e.to_string());
            shared.set_status(status.clone());
            shared.emit(SessionEvent::Stopped(status));
            return;
        }
    };

    let mut capture = CaptureGuard::new(source);
    lock(&shared.pipeline).reset_session();
    {
        let mut snapshot = lock(&shared.snapshot);
        *snapshot = SessionSnapshot {
            status: SessionStatus::Running,
            user: lock(&shared.pipeline).current_user().to_string(),
            ..SessionSnapshot::default()
        };
    }
    shared.emit(SessionEvent::Started);
    info!("Detection session started");

    let exit_status = frame_loop(shared, &mut capture);

    // Release the camera before reporting the final status
    drop(capture);
    info!("Detection session ended: {}", exit_status.text());
    {
        let mut snapshot = lock(&shared.snapshot);
        snapshot.status = exit_status.clone();
        snapshot.frame = None;
        snapshot.panel = None;
    }
    shared.emit(SessionEvent::Stopped(exit_status));
}

fn frame_loop<S: crate::camera::FrameSource>(
    shared: &Shared,
    capture: &mut CaptureGuard<S>,
) -> SessionStatus {
    let config = &shared.config;
    let mut failures = 0u32;
    let mut fps = FpsCounter::new(30);
    let mut last_emotion = None;
    let mut frames_processed = 0u64;

    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return SessionStatus::Stopped;
        }

        let started = Instant::now();
        let frame = match capture.read_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Frame read failed ({}/{}): {}",
                    failures, config.max_consecutive_read_failures, e
                );
                if failures >= config.max_consecutive_read_failures {
                    return SessionStatus::CameraLost(e.to_string());
                }
                std::thread::sleep(config.read_retry_delay);
                continue;
            }
        };

        let equalize = shared.equalize.load(Ordering::SeqCst);
        let (output, user) = {
            let mut pipeline = lock(&shared.pipeline);
            let output = pipeline.process(frame, equalize);
            (output, pipeline.current_user().to_string())
        };
        frames_processed += 1;

        let emotion = output.emotion.map(|e| e.emotion);
        if emotion != last_emotion {
            if let Some(result) = output.emotion {
                shared.emit(SessionEvent::EmotionChanged(result));
            }
            last_emotion = emotion;
        }
        if let Some(name) = &output.recognized {
            shared.emit(SessionEvent::UserRecognized(name.clone()));
        }

        fps.record(started.elapsed());
        {
            let mut snapshot = lock(&shared.snapshot);
            snapshot.frame = Some(output.annotated);
            snapshot.panel = Some(output.panel);
            snapshot.face_count = output.face_count;
            snapshot.emotion = output.emotion;
            snapshot.user = user;
            snapshot.fps = fps.fps();
            snapshot.frames_processed = frames_processed;
        }

        let elapsed = started.elapsed();
        if elapsed < config.frame_interval {
            std::thread::sleep(config.frame_interval - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FrameSource;
    use crate::error::{EmotionDetectorError, Result};
    use crate::models::{EmotionState, Frame};
    use crate::pipeline::test_support::{pipeline, Scripted, ScriptedDetector};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct CameraStats {
        reads: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    struct CountingSource {
        stats: CameraStats,
        fail_reads: bool,
    }

    impl FrameSource for CountingSource {
        fn read_frame(&mut self) -> Result<Frame> {
            self.stats.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(EmotionDetectorError::FrameCapture("unplugged".into()));
            }
            Ok(Frame::new(RgbImage::new(16, 12)))
        }

        fn release(&mut self) {
            self.stats.released.store(true, Ordering::SeqCst);
        }
    }

    fn factory(stats: &CameraStats, fail_reads: bool) -> SourceFactory {
        let stats = stats.clone();
        Box::new(move || Ok(Box::new(CountingSource { stats, fail_reads }) as Box<dyn FrameSource>))
    }

    fn session(script: Vec<Scripted>) -> DetectionSession {
        let config = SessionConfig {
            frame_interval: Duration::from_millis(2),
            max_consecutive_read_failures: 5,
            read_retry_delay: Duration::from_millis(1),
            equalize_histogram: false,
        };
        let pipeline = pipeline(ScriptedDetector::new(script), 5);
        DetectionSession::new(Arc::new(Mutex::new(pipeline)), config)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn start_is_idempotent() {
        let stats = CameraStats::default();
        let mut session = session(vec![Scripted::NoFace]);
        assert!(session.start(factory(&stats, false)));
        assert!(!session.start(factory(&stats, false)));
        assert!(session.is_running());
        session.stop_and_wait();
        assert!(!session.is_running());

        // Can start again after stopping
        assert!(session.start(factory(&stats, false)));
        session.stop_and_wait();
    }

    #[test]
    fn stop_releases_camera_promptly() {
        let stats = CameraStats::default();
        let mut session = session(vec![Scripted::Face(EmotionState::Happy)]);
        let mut events = session.subscribe();
        session.start(factory(&stats, false));

        assert!(wait_until(|| session.snapshot().frames_processed >= 3));
        session.stop();
        let reads_at_stop = stats.reads.load(Ordering::SeqCst);
        assert!(wait_until(|| !session.is_running()));

        assert!(stats.released.load(Ordering::SeqCst));
        assert!(stats.reads.load(Ordering::SeqCst) <= reads_at_stop + 1);
        assert_eq!(session.status(), SessionStatus::Stopped);

        assert_eq!(events.try_recv().unwrap(), SessionEvent::Started);
        match events.try_recv().unwrap() {
            SessionEvent::EmotionChanged(result) => assert_eq!(result.emotion, EmotionState::Happy),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn repeated_read_failures_end_session_and_release() {
        let stats = CameraStats::default();
        let mut session = session(vec![Scripted::NoFace]);
        session.start(factory(&stats, true));

        assert!(wait_until(|| !session.is_running()));
        assert!(stats.released.load(Ordering::SeqCst));
        assert_eq!(stats.reads.load(Ordering::SeqCst), 5);
        let status = session.status();
        assert!(matches!(status, SessionStatus::CameraLost(_)));
        assert!(status.needs_reinitialize());
    }

    #[test]
    fn unavailable_camera_is_reported() {
        let mut session = session(vec![Scripted::NoFace]);
        let failing: SourceFactory =
            Box::new(|| Err(EmotionDetectorError::CameraInit("no device".into())));
        assert!(session.start(failing));
        assert!(wait_until(|| !session.is_running()));
        assert!(matches!(session.status(), SessionStatus::CameraUnavailable(_)));
    }

    #[test]
    fn detector_failures_do_not_end_session() {
        let stats = CameraStats::default();
        let mut session = session(vec![
            Scripted::Fail,
            Scripted::Panic,
            Scripted::Face(EmotionState::Neutral),
        ]);
        session.start(factory(&stats, false));
        assert!(wait_until(|| session.snapshot().emotion.is_some()));
        assert_eq!(session.snapshot().status, SessionStatus::Running);
        assert_eq!(session.snapshot().face_count, 1);
        session.stop_and_wait();
        assert!(stats.released.load(Ordering::SeqCst));
    }

    #[test]
    fn fps_counter_averages_window() {
        let mut fps = FpsCounter::new(2);
        assert_eq!(fps.fps(), 0.0);
        fps.record(Duration::from_millis(500));
        fps.record(Duration::from_millis(100));
        fps.record(Duration::from_millis(100));
        assert!((fps.fps() - 10.0).abs() < 1e-3);
    }
}
