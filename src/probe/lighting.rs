//! Lighting probe
//!
//! Reads frames from the webcam's stream without owning it. Each sample
//! finds a surface bound to the stream, waits for it to become ready, lets
//! the camera settle and measures the mean luminance of one frame.

use super::{Probe, ProbeKind, ProbeSnapshot, ProbeStatus};
use crate::analysis::{classify_brightness, mean_luminance};
use crate::capture::{DeviceError, StreamHandle, SurfaceRegistry, VideoSurface};
use crate::config::LightingConfig;
use async_trait::async_trait;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct LightingInner {
    options: LightingConfig,
    registry: SurfaceRegistry,
    status_tx: watch::Sender<ProbeStatus>,
    brightness_tx: watch::Sender<u8>,
    stream: RwLock<Option<StreamHandle>>,
    dedicated: RwLock<Option<Arc<VideoSurface>>>,
    hidden: ParkingMutex<Option<Arc<VideoSurface>>>,
    sampler: ParkingMutex<Option<JoinHandle<()>>>,
}

impl LightingInner {
    /// Pick a surface bound to `stream`, synthesizing a hidden one if needed
    fn locate_source(&self, stream: &StreamHandle) -> Arc<VideoSurface> {
        let dedicated = self.dedicated.read().clone();
        if let Some(surface) = dedicated.filter(|s| s.bound_stream() == Some(stream.id())) {
            return surface;
        }
        if let Some(surface) = self.registry.find_bound(stream.id()) {
            return surface;
        }

        let mut hidden = self.hidden.lock();
        match hidden.as_ref() {
            Some(surface) if surface.bound_stream() == Some(stream.id()) => surface.clone(),
            _ => {
                tracing::debug!("No surface bound to stream {}, creating a hidden one", stream.id());
                let surface = VideoSurface::hidden(stream.clone());
                *hidden = Some(surface.clone());
                surface
            }
        }
    }

    async fn sample(&self, stream: &StreamHandle) -> Result<u8, DeviceError> {
        let surface = self.locate_source(stream);
        surface.wait_ready().await?;
        tokio::time::sleep(self.options.stabilization_delay()).await;

        let frame = surface.screenshot().ok_or(DeviceError::Stopped)?;
        let brightness = mean_luminance(&frame);
        let level = classify_brightness(
            brightness,
            self.options.dark_threshold,
            self.options.bright_threshold,
        );

        self.brightness_tx.send_replace(brightness);
        let status = if level.is_adequate() {
            ProbeStatus::Good
        } else {
            ProbeStatus::Poor
        };
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::info!("Lighting {:?}: brightness {} ({:?})", status, brightness, level);
        }
        Ok(brightness)
    }
}

/// Sample until the stream goes away; a zero interval samples once
async fn sampling_loop(inner: Weak<LightingInner>, stream: StreamHandle) {
    loop {
        let Some(probe) = inner.upgrade() else {
            break;
        };
        match probe.sample(&stream).await {
            Ok(_) => {}
            Err(DeviceError::Stopped) => {
                tracing::debug!("Webcam stream stopped, lighting sampling ended");
                break;
            }
            Err(e) => {
                tracing::error!("Lighting check error: {}", e);
                probe.status_tx.send_replace(ProbeStatus::Error);
                break;
            }
        }

        let Some(interval) = probe.options.sample_interval() else {
            break;
        };
        drop(probe);
        tokio::time::sleep(interval).await;
    }
}

/// Ambient lighting probe
#[derive(Clone)]
pub struct LightingProbe {
    inner: Arc<LightingInner>,
}

impl LightingProbe {
    pub fn new(options: LightingConfig, registry: SurfaceRegistry) -> Self {
        let (status_tx, _) = watch::channel(ProbeStatus::Checking);
        let (brightness_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(LightingInner {
                options,
                registry,
                status_tx,
                brightness_tx,
                stream: RwLock::new(None),
                dedicated: RwLock::new(None),
                hidden: ParkingMutex::new(None),
                sampler: ParkingMutex::new(None),
            }),
        }
    }

    /// Prefer `surface` over registry lookups while it shows the measured
    /// stream
    pub fn set_surface(&self, surface: Option<Arc<VideoSurface>>) {
        *self.inner.dedicated.write() = surface;
    }

    /// Point the probe at a new stream, or at none. Pending samples for the
    /// old stream are cancelled either way.
    pub fn set_stream(&self, stream: Option<StreamHandle>) {
        self.cancel_pending();
        *self.inner.hidden.lock() = None;
        *self.inner.stream.write() = stream;
        self.check_lighting();
    }

    /// Keep following the stream published by `source` until it closes
    pub fn follow(&self, mut source: watch::Receiver<Option<StreamHandle>>) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let stream = source.borrow_and_update().clone();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let probe = LightingProbe { inner };
                let current = probe.inner.stream.read().clone();
                if current != stream {
                    probe.set_stream(stream);
                }
                drop(probe);
                if source.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Restart sampling from scratch if a stream is present
    pub fn check_lighting(&self) -> bool {
        let Some(stream) = self.inner.stream.read().clone() else {
            return false;
        };
        self.cancel_pending();
        self.inner.status_tx.send_replace(ProbeStatus::Checking);
        let task = tokio::spawn(sampling_loop(Arc::downgrade(&self.inner), stream));
        *self.inner.sampler.lock() = Some(task);
        true
    }

    pub fn brightness(&self) -> u8 {
        *self.inner.brightness_tx.borrow()
    }

    pub fn watch_brightness(&self) -> watch::Receiver<u8> {
        self.inner.brightness_tx.subscribe()
    }

    /// Whether a sampling task is scheduled or running
    pub fn is_sampling(&self) -> bool {
        self.inner
            .sampler
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn cancel_pending(&self) {
        if let Some(task) = self.inner.sampler.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Probe for LightingProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Lighting
    }

    fn status(&self) -> ProbeStatus {
        *self.inner.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ProbeStatus> {
        self.inner.status_tx.subscribe()
    }

    fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot::new(ProbeKind::Lighting, self.status())
            .with_details(format!("Brightness: {}", self.brightness()))
    }

    async fn retry_check(&self) -> bool {
        self.check_lighting()
    }

    async fn shutdown(&self) {
        self.cancel_pending();
        *self.inner.hidden.lock() = None;
        *self.inner.stream.write() = None;
    }
}
