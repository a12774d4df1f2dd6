//! Webcam probe
//!
//! Owns the camera stream. The probe first checks that a camera can be
//! opened at all, then acquires the stream it actually keeps and binds it to
//! its preview surface. Dependents only ever see a [`StreamHandle`].

use super::{Probe, ProbeKind, ProbeSnapshot, ProbeStatus};
use crate::capture::{
    DeviceError, MediaDevices, MediaRequest, MediaStream, StillImage, StreamHandle,
    SurfaceRegistry, VideoConstraints, VideoSurface,
};
use crate::recorder::CaptureSource;
use crate::utils::{CheckError, CheckResult};
use async_trait::async_trait;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Called when the presentation layer must rebuild its preview to
/// renegotiate camera access
pub type RemountHook = Arc<dyn Fn() + Send + Sync>;

struct WebcamInner {
    devices: Arc<dyn MediaDevices>,
    constraints: VideoConstraints,
    status_tx: watch::Sender<ProbeStatus>,
    stream: ParkingMutex<Option<MediaStream>>,
    stream_tx: watch::Sender<Option<StreamHandle>>,
    preview: Arc<VideoSurface>,
    remount: RwLock<Option<RemountHook>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

/// Camera permission and stream probe
#[derive(Clone)]
pub struct WebcamProbe {
    inner: Arc<WebcamInner>,
}

impl WebcamProbe {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        constraints: VideoConstraints,
        registry: &SurfaceRegistry,
    ) -> Self {
        let preview = VideoSurface::new("webcam-preview");
        registry.register(&preview);
        let (status_tx, _) = watch::channel(ProbeStatus::Checking);
        let (stream_tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(WebcamInner {
                devices,
                constraints,
                status_tx,
                stream: ParkingMutex::new(None),
                stream_tx,
                preview,
                remount: RwLock::new(None),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Initial activation: confirm a camera can be opened, then acquire the
    /// stream the probe keeps
    pub async fn check_access(&self) {
        let generation = self.next_generation();
        self.inner.closed.store(false, Ordering::SeqCst);
        self.release_stream();
        self.set_status(ProbeStatus::Checking);

        if !self.inner.devices.is_supported() {
            tracing::warn!("Media devices are not supported, webcam check failed");
            self.set_status(ProbeStatus::Error);
            return;
        }

        let probe = self
            .inner
            .devices
            .get_user_media(MediaRequest::Video(self.inner.constraints.clone()))
            .await;
        if !self.is_current(generation) {
            tracing::debug!("Discarding stale webcam existence check");
            return;
        }
        match probe {
            // Only proves access; the retained stream is negotiated next
            Ok(stream) => stream.stop(),
            Err(e) => {
                self.on_user_media_error(&e);
                return;
            }
        }

        let hook = self.inner.remount.read().clone();
        match hook {
            Some(remount) => remount(),
            None => self.acquire(generation).await,
        }
    }

    async fn acquire(&self, generation: u64) {
        let result = self
            .inner
            .devices
            .get_user_media(MediaRequest::Video(self.inner.constraints.clone()))
            .await;

        if !self.is_current(generation) {
            // Dropping the stream releases the camera
            tracing::debug!("Discarding stale webcam grant (generation {})", generation);
            return;
        }

        match result {
            Ok(stream) => self.on_user_media(stream),
            Err(e) => self.on_user_media_error(&e),
        }
    }

    /// A stream was granted for the preview surface. Grants arriving after
    /// shutdown are stopped at once.
    pub fn on_user_media(&self, stream: MediaStream) {
        if self.inner.closed.load(Ordering::SeqCst) {
            tracing::debug!("Dropping webcam grant after shutdown (stream {})", stream.id());
            stream.stop();
            return;
        }
        let handle = stream.handle();
        let previous = self.inner.stream.lock().replace(stream);
        if let Some(previous) = previous {
            previous.stop();
        }

        self.inner.preview.bind(handle.clone());
        self.inner.stream_tx.send_replace(Some(handle.clone()));
        self.set_status(ProbeStatus::Granted);
        tracing::info!("Webcam access granted (stream {})", handle.id());
    }

    /// Camera access failed or was refused
    pub fn on_user_media_error(&self, error: &DeviceError) {
        tracing::warn!("Webcam access error: {}", error);
        self.release_stream();
        self.set_status(ProbeStatus::from(error));
    }

    /// Install the hook used to rebuild a presentation-owned preview
    pub fn set_remount_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.remount.write() = Some(Arc::new(hook));
    }

    pub fn clear_remount_hook(&self) {
        *self.inner.remount.write() = None;
    }

    /// Read-only view of the held stream
    pub fn stream(&self) -> Option<StreamHandle> {
        self.inner.stream_tx.borrow().clone()
    }

    /// Observe the held stream being replaced or released
    pub fn watch_stream(&self) -> watch::Receiver<Option<StreamHandle>> {
        self.inner.stream_tx.subscribe()
    }

    pub fn preview(&self) -> Arc<VideoSurface> {
        self.inner.preview.clone()
    }

    /// Take a still from the preview surface
    pub fn capture_still(&self) -> CheckResult<StillImage> {
        let frame = self
            .inner
            .preview
            .screenshot()
            .ok_or_else(|| CheckError::Capture("no frame available".to_string()))?;
        StillImage::from_frame(&frame).map_err(|e| CheckError::Capture(e.to_string()))
    }

    fn release_stream(&self) {
        let stream = self.inner.stream.lock().take();
        if let Some(stream) = stream {
            self.inner.preview.unbind();
            self.inner.stream_tx.send_replace(None);
            stream.stop();
            tracing::debug!("Released webcam stream {}", stream.id());
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn set_status(&self, status: ProbeStatus) {
        let previous = self.inner.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!("Webcam status {:?} -> {:?}", previous, status);
        }
    }
}

#[async_trait]
impl Probe for WebcamProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Webcam
    }

    fn status(&self) -> ProbeStatus {
        *self.inner.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ProbeStatus> {
        self.inner.status_tx.subscribe()
    }

    fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot::new(ProbeKind::Webcam, self.status())
    }

    async fn retry_check(&self) -> bool {
        let generation = self.next_generation();
        self.inner.closed.store(false, Ordering::SeqCst);
        self.set_status(ProbeStatus::Checking);
        self.release_stream();

        let hook = self.inner.remount.read().clone();
        match hook {
            Some(remount) => remount(),
            None => self.acquire(generation).await,
        }
        true
    }

    async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.next_generation();
        self.release_stream();
    }
}

impl CaptureSource for WebcamProbe {
    fn is_capture_ready(&self) -> bool {
        self.status() == ProbeStatus::Granted && self.inner.preview.is_ready()
    }

    fn capture_still(&self) -> CheckResult<StillImage> {
        WebcamProbe::capture_still(self)
    }

    fn stream(&self) -> Option<StreamHandle> {
        WebcamProbe::stream(self)
    }
}
