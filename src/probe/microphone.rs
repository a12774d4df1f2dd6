//! Microphone probe
//!
//! Acquires an audio-only stream and meters it. The monitoring pipeline (frame
//! task, optional duration timer, analysis context and the stream itself) is
//! built and torn down as one unit.

use super::{Probe, ProbeKind, ProbeSnapshot, ProbeStatus};
use crate::analysis::SpectrumAnalyser;
use crate::capture::{AudioFeed, MediaDevices, MediaRequest, MediaStream};
use crate::config::MicrophoneConfig;
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Analysis state shared between the pipeline and its frame task
struct AnalysisContext {
    closed: AtomicBool,
}

impl AnalysisContext {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Pipeline {
    generation: u64,
    frame_task: JoinHandle<()>,
    duration_timer: Option<JoinHandle<()>>,
    context: Arc<AnalysisContext>,
    stream: MediaStream,
}

impl Pipeline {
    fn teardown(self) {
        self.frame_task.abort();
        if let Some(timer) = self.duration_timer {
            timer.abort();
        }
        if !self.context.is_closed() {
            self.context.close();
        }
        self.stream.stop();
    }
}

struct MicrophoneInner {
    devices: Arc<dyn MediaDevices>,
    options: MicrophoneConfig,
    status_tx: watch::Sender<ProbeStatus>,
    level_tx: Arc<watch::Sender<f32>>,
    pipeline: ParkingMutex<Option<Pipeline>>,
    generation: AtomicU64,
}

impl MicrophoneInner {
    fn stop_monitoring(&self) {
        let pipeline = self.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            tracing::debug!("Stopping microphone monitoring (generation {})", pipeline.generation);
            pipeline.teardown();
        }
        self.level_tx.send_replace(0.0);
    }

    /// Stop only if the pipeline still belongs to `generation`
    fn expire(&self, generation: u64) {
        let owned = matches!(&*self.pipeline.lock(), Some(p) if p.generation == generation);
        if owned {
            tracing::debug!("Microphone monitor duration elapsed");
            self.stop_monitoring();
        }
    }
}

/// Microphone permission and level probe
#[derive(Clone)]
pub struct MicrophoneProbe {
    inner: Arc<MicrophoneInner>,
}

impl MicrophoneProbe {
    pub fn new(devices: Arc<dyn MediaDevices>, options: MicrophoneConfig) -> Self {
        let (status_tx, _) = watch::channel(ProbeStatus::Checking);
        let (level_tx, _) = watch::channel(0.0);
        Self {
            inner: Arc::new(MicrophoneInner {
                devices,
                options,
                status_tx,
                level_tx: Arc::new(level_tx),
                pipeline: ParkingMutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Request microphone access and start metering.
    ///
    /// The newest call always wins; grants that arrive for an older call are
    /// released immediately.
    pub async fn check_microphone_access(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.stop_monitoring();
        self.set_status(ProbeStatus::Checking);

        if !self.inner.devices.is_supported() {
            tracing::warn!("Media devices are not supported, microphone check failed");
            self.set_status(ProbeStatus::Error);
            return;
        }

        let result = self.inner.devices.get_user_media(MediaRequest::Audio).await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale microphone grant (generation {})", generation);
            return;
        }

        match result {
            Ok(stream) => self.start_monitoring(stream, generation),
            Err(e) => {
                tracing::warn!("Microphone access error: {}", e);
                self.set_status(ProbeStatus::from(&e));
            }
        }
    }

    fn start_monitoring(&self, stream: MediaStream, generation: u64) {
        let Some(feed) = stream.audio_feed() else {
            tracing::warn!("Microphone stream has no audio track");
            self.set_status(ProbeStatus::Error);
            return;
        };
        let analyser = match SpectrumAnalyser::new(
            self.inner.options.fft_size,
            self.inner.options.smoothing_time_constant,
        ) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("Audio monitoring error: {}", e);
                self.set_status(ProbeStatus::Error);
                return;
            }
        };

        let mut slot = self.inner.pipeline.lock();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale microphone grant (generation {})", generation);
            return;
        }
        if let Some(previous) = slot.take() {
            previous.teardown();
        }

        let context = Arc::new(AnalysisContext {
            closed: AtomicBool::new(false),
        });
        let frame_task = tokio::spawn(meter(
            feed,
            analyser,
            context.clone(),
            self.inner.level_tx.clone(),
            self.inner.options.frame_interval(),
        ));
        let duration_timer = self.inner.options.monitor_duration().map(|duration| {
            let inner: Weak<MicrophoneInner> = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(inner) = inner.upgrade() {
                    inner.expire(generation);
                }
            })
        });

        *slot = Some(Pipeline {
            generation,
            frame_task,
            duration_timer,
            context,
            stream,
        });
        drop(slot);

        self.set_status(ProbeStatus::Granted);
        tracing::info!("Microphone access granted, monitoring started");
    }

    /// Tear down the monitoring pipeline. Safe to call repeatedly.
    pub fn stop_monitoring(&self) {
        self.inner.stop_monitoring();
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.pipeline.lock().is_some()
    }

    /// Mean byte magnitude across frequency bins
    pub fn audio_level(&self) -> f32 {
        *self.inner.level_tx.borrow()
    }

    pub fn watch_level(&self) -> watch::Receiver<f32> {
        self.inner.level_tx.subscribe()
    }

    fn set_status(&self, status: ProbeStatus) {
        let previous = self.inner.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!("Microphone status {:?} -> {:?}", previous, status);
        }
    }
}

/// Sample the feed once per display frame until the context closes
async fn meter(
    feed: Arc<dyn AudioFeed>,
    mut analyser: SpectrumAnalyser,
    context: Arc<AnalysisContext>,
    level_tx: Arc<watch::Sender<f32>>,
    frame_interval: std::time::Duration,
) {
    let mut samples = vec![0.0f32; analyser.fft_size()];
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if context.is_closed() {
            break;
        }
        feed.copy_latest(&mut samples);
        level_tx.send_replace(analyser.level(&samples));
    }
}

#[async_trait]
impl Probe for MicrophoneProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Microphone
    }

    fn status(&self) -> ProbeStatus {
        *self.inner.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ProbeStatus> {
        self.inner.status_tx.subscribe()
    }

    fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot::new(ProbeKind::Microphone, self.status()).with_audio_level(self.audio_level())
    }

    async fn retry_check(&self) -> bool {
        self.check_microphone_access().await;
        true
    }

    async fn shutdown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticDevices, SyntheticOutcome, Tone, TrackKind};
    use std::time::Duration;

    fn probe_with(devices: Arc<SyntheticDevices>, options: MicrophoneConfig) -> MicrophoneProbe {
        MicrophoneProbe::new(devices, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_starts_metering() {
        let devices = Arc::new(SyntheticDevices::new());
        let probe = probe_with(devices.clone(), MicrophoneConfig::default());

        probe.check_microphone_access().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(probe.status(), ProbeStatus::Granted);
        assert!(probe.is_monitoring());
        assert!(probe.audio_level() > 0.0);
        assert_eq!(devices.live_streams(TrackKind::Audio), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_reads_zero_level() {
        let devices = Arc::new(SyntheticDevices::new().with_tone(Tone::SILENCE));
        let probe = probe_with(devices, MicrophoneConfig::default());

        probe.check_microphone_access().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(probe.audio_level(), 0.0);
        assert_eq!(probe.snapshot().audio_level, Some(0.0));
    }

    #[tokio::test]
    async fn test_denied() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.push_microphone_outcome(SyntheticOutcome::Deny);
        let probe = probe_with(devices.clone(), MicrophoneConfig::default());

        probe.check_microphone_access().await;

        assert_eq!(probe.status(), ProbeStatus::Denied);
        assert!(!probe.is_monitoring());
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
    }

    #[tokio::test]
    async fn test_missing_device_is_error() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.push_microphone_outcome(SyntheticOutcome::NotFound);
        let probe = probe_with(devices, MicrophoneConfig::default());

        probe.check_microphone_access().await;
        assert_eq!(probe.status(), ProbeStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_is_idempotent() {
        let devices = Arc::new(SyntheticDevices::new());
        let probe = probe_with(devices.clone(), MicrophoneConfig::default());
        probe.check_microphone_access().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        probe.stop_monitoring();
        probe.stop_monitoring();

        assert!(!probe.is_monitoring());
        assert_eq!(probe.audio_level(), 0.0);
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_expiry_tears_down_pipeline() {
        let devices = Arc::new(SyntheticDevices::new());
        let options = MicrophoneConfig {
            monitor_duration_ms: 500,
            ..MicrophoneConfig::default()
        };
        let probe = probe_with(devices.clone(), options);
        probe.check_microphone_access().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(probe.is_monitoring());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!probe.is_monitoring());
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
        assert_eq!(probe.status(), ProbeStatus::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_retries_leave_one_pipeline() {
        let devices = Arc::new(SyntheticDevices::new().with_latency(Duration::from_millis(100)));
        let probe = probe_with(devices.clone(), MicrophoneConfig::default());

        let (a, b) = tokio::join!(probe.retry_check(), probe.retry_check());
        assert!(a && b);

        assert_eq!(probe.status(), ProbeStatus::Granted);
        assert!(probe.is_monitoring());
        assert_eq!(devices.acquisitions(), 2);
        assert_eq!(devices.live_streams(TrackKind::Audio), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_in_flight_grant() {
        let devices = Arc::new(SyntheticDevices::new().with_latency(Duration::from_millis(100)));
        let probe = probe_with(devices.clone(), MicrophoneConfig::default());

        let pending = {
            let probe = probe.clone();
            tokio::spawn(async move { probe.check_microphone_access().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        probe.shutdown().await;
        pending.await.unwrap();

        assert!(!probe.is_monitoring());
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
    }
}
