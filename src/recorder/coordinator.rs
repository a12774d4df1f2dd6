//! Capture coordinator
//!
//! Owns the capture state machine: a countdown that ends in a still capture,
//! and a bounded recording window. Every timer it arms is cancelled by
//! [`CaptureCoordinator::shutdown`].

use super::media_recorder::MediaRecorder;
use super::state::{CaptureState, RecordedClip};
use super::CaptureSource;
use crate::capture::StillImage;
use crate::config::CaptureConfig;
use crate::probe::ProbeKind;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Reasons a capture action was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture already in progress ({0:?})")]
    Busy(CaptureState),

    #[error("webcam is not ready for capture")]
    SourceNotReady,

    #[error("{} check has not passed", .0.label())]
    ProbeNotPassing(ProbeKind),

    #[error("a still is already held; retake first")]
    StillHeld,

    #[error("capture coordinator is shut down")]
    Closed,
}

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Countdown armed with this many seconds
    CountdownStarted(u8),
    /// Countdown ticked, seconds remaining
    CountdownTick(u8),
    /// Still captured and held
    StillCaptured(Uuid),
    /// Countdown finished but no still could be taken
    CaptureFailed(String),
    /// Held still discarded
    StillCleared,
    /// Recording window opened
    RecordingStarted,
    /// Recording window closed with this many chunks
    RecordingStopped(usize),
}

struct CoordinatorInner {
    source: Arc<dyn CaptureSource>,
    options: CaptureConfig,
    state: Arc<RwLock<CaptureState>>,
    event_tx: broadcast::Sender<CaptureEvent>,
    still: RwLock<Option<StillImage>>,
    last_clip: RwLock<Option<RecordedClip>>,
    recorder: ParkingMutex<Option<MediaRecorder>>,
    countdown_timer: ParkingMutex<Option<JoinHandle<()>>>,
    recording_timer: ParkingMutex<Option<JoinHandle<()>>>,
    /// Set by shutdown while holding the state lock
    closed: AtomicBool,
}

impl CoordinatorInner {
    fn emit(&self, event: CaptureEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Advance the countdown by one second; returns false once it is over
    fn tick(&self) -> bool {
        let mut state = self.state.write();
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = match *state {
            CaptureState::Countdown(n) => n,
            _ => return false,
        };
        if remaining <= 1 {
            self.capture();
            *state = CaptureState::Idle;
            return false;
        }
        *state = CaptureState::Countdown(remaining - 1);
        self.emit(CaptureEvent::CountdownTick(remaining - 1));
        true
    }

    /// Called with the state lock held
    fn capture(&self) {
        match self.source.capture_still() {
            Ok(still) => {
                tracing::info!("Captured still {} ({}x{})", still.id, still.width, still.height);
                let id = still.id;
                *self.still.write() = Some(still);
                self.emit(CaptureEvent::StillCaptured(id));
            }
            Err(e) => {
                tracing::error!("Failed to capture still: {}", e);
                self.emit(CaptureEvent::CaptureFailed(e.to_string()));
            }
        }
    }

    fn finish_recording(&self) -> Option<RecordedClip> {
        let mut state = self.state.write();
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let mut recorder = self.recorder.lock().take()?;
        let clip = recorder.stop();
        let chunks = clip.chunk_count();
        *self.last_clip.write() = Some(clip.clone());
        *state = CaptureState::Idle;
        self.emit(CaptureEvent::RecordingStopped(chunks));
        tracing::info!("Recording stopped with {} chunks", chunks);
        Some(clip)
    }
}

async fn run_countdown(inner: Weak<CoordinatorInner>) {
    let start = tokio::time::Instant::now() + COUNTDOWN_TICK;
    let mut ticker = tokio::time::interval_at(start, COUNTDOWN_TICK);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.tick() {
            break;
        }
    }
}

/// Drives the countdown and recording window
#[derive(Clone)]
pub struct CaptureCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl CaptureCoordinator {
    pub fn new(source: Arc<dyn CaptureSource>, options: CaptureConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(CoordinatorInner {
                source,
                options,
                state: Arc::new(RwLock::new(CaptureState::Idle)),
                event_tx,
                still: RwLock::new(None),
                last_clip: RwLock::new(None),
                recorder: ParkingMutex::new(None),
                countdown_timer: ParkingMutex::new(None),
                recording_timer: ParkingMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.inner.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Arm the countdown; the still is taken when it reaches zero
    pub fn start_countdown(&self) -> Result<(), CaptureError> {
        let seconds = self.inner.options.countdown_secs.max(1);
        let mut state = self.inner.state.write();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CaptureError::Closed);
        }
        if !state.is_idle() {
            return Err(CaptureError::Busy(*state));
        }
        if self.inner.still.read().is_some() {
            return Err(CaptureError::StillHeld);
        }
        if !self.inner.source.is_capture_ready() {
            tracing::debug!("Countdown refused, webcam not ready");
            return Err(CaptureError::SourceNotReady);
        }
        *state = CaptureState::Countdown(seconds);

        tracing::info!("Starting {}s capture countdown", seconds);
        self.inner.emit(CaptureEvent::CountdownStarted(seconds));
        let task = tokio::spawn(run_countdown(Arc::downgrade(&self.inner)));
        if let Some(old) = self.inner.countdown_timer.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    /// Open the bounded recording window over the webcam stream
    pub fn start_recording(&self) -> Result<(), CaptureError> {
        let mut state = self.inner.state.write();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CaptureError::Closed);
        }
        if !state.is_idle() {
            return Err(CaptureError::Busy(*state));
        }
        let stream = self
            .inner
            .source
            .stream()
            .filter(|s| s.is_live())
            .ok_or(CaptureError::SourceNotReady)?;
        let recorder = MediaRecorder::start(stream, self.inner.options.recorder_frame_interval());
        *self.inner.recorder.lock() = Some(recorder);
        *state = CaptureState::Recording;

        let window = self.inner.options.recording_window();
        tracing::info!("Recording for {}ms", window.as_millis());
        self.inner.emit(CaptureEvent::RecordingStarted);

        let inner = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = inner.upgrade() {
                inner.finish_recording();
            }
        });
        if let Some(old) = self.inner.recording_timer.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    /// Close the recording window early
    pub fn stop_recording(&self) -> Option<RecordedClip> {
        if let Some(timer) = self.inner.recording_timer.lock().take() {
            timer.abort();
        }
        self.inner.finish_recording()
    }

    pub fn still(&self) -> Option<StillImage> {
        self.inner.still.read().clone()
    }

    pub fn has_still(&self) -> bool {
        self.inner.still.read().is_some()
    }

    /// Discard the held still so a new one can be taken
    pub fn retake(&self) {
        if self.inner.still.write().take().is_some() {
            self.inner.emit(CaptureEvent::StillCleared);
        }
    }

    pub fn last_clip(&self) -> Option<RecordedClip> {
        self.inner.last_clip.read().clone()
    }

    /// A still is held, so the assessment may begin
    pub fn ready_for_assessment(&self) -> bool {
        self.has_still()
    }

    /// Cancel every pending timer and release the recorder. Later capture
    /// requests are refused with [`CaptureError::Closed`].
    pub fn shutdown(&self) {
        let mut state = self.inner.state.write();
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(timer) = self.inner.countdown_timer.lock().take() {
            timer.abort();
        }
        if let Some(timer) = self.inner.recording_timer.lock().take() {
            timer.abort();
        }
        if let Some(mut recorder) = self.inner.recorder.lock().take() {
            recorder.stop();
        }
        *state = CaptureState::Idle;
        tracing::debug!("Capture coordinator shut down");
    }
}
