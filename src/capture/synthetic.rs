//! Synthetic media devices
//!
//! A scripted stand-in for real hardware: a solid-colour camera, a sine-tone
//! microphone and a queue of permission outcomes. Used for headless runs and
//! throughout the test suite.

use super::frame::Frame;
use super::stream::MediaStream;
use super::traits::{AudioFeed, DeviceError, MediaDevices, MediaRequest, TrackKind, VideoFeed};
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What the next permission prompt should answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticOutcome {
    Grant,
    Deny,
    NotFound,
    Fail(String),
}

/// A pure tone fed into the synthetic microphone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub amplitude: f32,
    pub frequency_hz: f32,
}

impl Tone {
    pub const SILENCE: Tone = Tone {
        amplitude: 0.0,
        frequency_hz: 440.0,
    };
}

/// Camera feed that always shows one colour
pub struct SyntheticCameraFeed {
    width: u32,
    height: u32,
    color: Arc<ParkingMutex<[u8; 3]>>,
    delivered: AtomicBool,
    frames_tx: watch::Sender<u64>,
}

impl SyntheticCameraFeed {
    /// A feed with its first frame already decoded
    pub fn new(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::with_color(width, height, Arc::new(ParkingMutex::new(rgb)), true)
    }

    /// A feed that has not delivered a frame yet
    pub fn pending(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::with_color(width, height, Arc::new(ParkingMutex::new(rgb)), false)
    }

    fn with_color(width: u32, height: u32, color: Arc<ParkingMutex<[u8; 3]>>, delivered: bool) -> Self {
        let (frames_tx, _) = watch::channel(u64::from(delivered));
        Self {
            width,
            height,
            color,
            delivered: AtomicBool::new(delivered),
            frames_tx,
        }
    }

    pub fn deliver_first_frame(&self) {
        self.delivered.store(true, Ordering::SeqCst);
        self.frames_tx.send_modify(|n| *n += 1);
    }

    pub fn set_color(&self, rgb: [u8; 3]) {
        *self.color.lock() = rgb;
        self.frames_tx.send_modify(|n| *n += 1);
    }
}

impl VideoFeed for SyntheticCameraFeed {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.delivered
            .load(Ordering::SeqCst)
            .then_some((self.width, self.height))
    }

    fn latest_frame(&self) -> Option<Frame> {
        let (width, height) = self.dimensions()?;
        Some(Frame::filled(width, height, *self.color.lock()))
    }

    fn frames(&self) -> watch::Receiver<u64> {
        self.frames_tx.subscribe()
    }
}

/// Microphone feed producing a sine tone
pub struct SyntheticMicrophoneFeed {
    sample_rate: u32,
    tone: Arc<ParkingMutex<Tone>>,
}

impl SyntheticMicrophoneFeed {
    pub fn new(tone: Tone) -> Self {
        Self {
            sample_rate: 48_000,
            tone: Arc::new(ParkingMutex::new(tone)),
        }
    }

    fn shared(tone: Arc<ParkingMutex<Tone>>) -> Self {
        Self {
            sample_rate: 48_000,
            tone,
        }
    }
}

impl AudioFeed for SyntheticMicrophoneFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn copy_latest(&self, out: &mut [f32]) -> usize {
        let tone = *self.tone.lock();
        let step = 2.0 * PI * tone.frequency_hz / self.sample_rate as f32;
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = tone.amplitude * (step * i as f32).sin();
        }
        out.len()
    }
}

/// Scripted media devices
pub struct SyntheticDevices {
    supported: bool,
    latency: Duration,
    camera_size: (u32, u32),
    color: Arc<ParkingMutex<[u8; 3]>>,
    tone: Arc<ParkingMutex<Tone>>,
    camera_outcomes: ParkingMutex<VecDeque<SyntheticOutcome>>,
    microphone_outcomes: ParkingMutex<VecDeque<SyntheticOutcome>>,
    live_video: Arc<AtomicUsize>,
    live_audio: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    /// Devices that grant everything instantly, with a mid-grey camera
    pub fn new() -> Self {
        Self {
            supported: true,
            latency: Duration::ZERO,
            camera_size: (64, 36),
            color: Arc::new(ParkingMutex::new([128, 128, 128])),
            tone: Arc::new(ParkingMutex::new(Tone {
                amplitude: 0.5,
                frequency_hz: 440.0,
            })),
            camera_outcomes: ParkingMutex::new(VecDeque::new()),
            microphone_outcomes: ParkingMutex::new(VecDeque::new()),
            live_video: Arc::new(AtomicUsize::new(0)),
            live_audio: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Devices on a platform without any media support
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Delay every permission prompt by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_camera_size(mut self, width: u32, height: u32) -> Self {
        self.camera_size = (width, height);
        self
    }

    pub fn with_camera_color(self, rgb: [u8; 3]) -> Self {
        *self.color.lock() = rgb;
        self
    }

    pub fn with_tone(self, tone: Tone) -> Self {
        *self.tone.lock() = tone;
        self
    }

    /// Queue the answer for the next camera prompt; unqueued prompts grant
    pub fn push_camera_outcome(&self, outcome: SyntheticOutcome) {
        self.camera_outcomes.lock().push_back(outcome);
    }

    /// Queue the answer for the next microphone prompt
    pub fn push_microphone_outcome(&self, outcome: SyntheticOutcome) {
        self.microphone_outcomes.lock().push_back(outcome);
    }

    /// Change what every camera stream shows from now on
    pub fn set_camera_color(&self, rgb: [u8; 3]) {
        *self.color.lock() = rgb;
    }

    pub fn set_tone(&self, tone: Tone) {
        *self.tone.lock() = tone;
    }

    /// Streams handed out and not yet stopped
    pub fn live_streams(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Video => self.live_video.load(Ordering::SeqCst),
            TrackKind::Audio => self.live_audio.load(Ordering::SeqCst),
        }
    }

    /// Total number of prompts answered
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn open(&self, kind: TrackKind) -> MediaStream {
        let live = match kind {
            TrackKind::Video => self.live_video.clone(),
            TrackKind::Audio => self.live_audio.clone(),
        };
        live.fetch_add(1, Ordering::SeqCst);

        let stream = match kind {
            TrackKind::Video => {
                let (width, height) = self.camera_size;
                let feed = SyntheticCameraFeed::with_color(width, height, self.color.clone(), true);
                MediaStream::video("Synthetic Camera", Arc::new(feed))
            }
            TrackKind::Audio => {
                let feed = SyntheticMicrophoneFeed::shared(self.tone.clone());
                MediaStream::audio("Synthetic Microphone", Arc::new(feed))
            }
        };
        stream.on_release(move || {
            live.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_user_media(&self, request: MediaRequest) -> Result<MediaStream, DeviceError> {
        if !self.supported {
            return Err(DeviceError::NotSupported);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let kind = request.kind();
        let outcome = match kind {
            TrackKind::Video => self.camera_outcomes.lock().pop_front(),
            TrackKind::Audio => self.microphone_outcomes.lock().pop_front(),
        }
        .unwrap_or(SyntheticOutcome::Grant);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            SyntheticOutcome::Grant => Ok(self.open(kind)),
            SyntheticOutcome::Deny => Err(DeviceError::PermissionDenied),
            SyntheticOutcome::NotFound => Err(DeviceError::NotFound(format!("no {:?} device", kind))),
            SyntheticOutcome::Fail(reason) => Err(DeviceError::Failure(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let devices = SyntheticDevices::new();
        devices.push_camera_outcome(SyntheticOutcome::Deny);

        let denied = devices.get_user_media(MediaRequest::Video(Default::default())).await;
        assert_eq!(denied.unwrap_err(), DeviceError::PermissionDenied);

        let granted = devices.get_user_media(MediaRequest::Video(Default::default())).await;
        assert!(granted.is_ok());
        assert_eq!(devices.acquisitions(), 2);
    }

    #[tokio::test]
    async fn test_live_stream_accounting() {
        let devices = SyntheticDevices::new();
        let stream = devices.get_user_media(MediaRequest::Audio).await.unwrap();
        assert_eq!(devices.live_streams(TrackKind::Audio), 1);
        assert_eq!(devices.live_streams(TrackKind::Video), 0);

        stream.stop();
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
    }

    #[tokio::test]
    async fn test_camera_colour_is_shared() {
        let devices = SyntheticDevices::new().with_camera_size(2, 2);
        let stream = devices
            .get_user_media(MediaRequest::Video(Default::default()))
            .await
            .unwrap();
        let feed = stream.video_feed().unwrap();

        devices.set_camera_color([10, 20, 30]);
        let frame = feed.latest_frame().unwrap();
        assert_eq!(&frame.data[0..3], &[10, 20, 30]);
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let devices = SyntheticDevices::unsupported();
        assert!(!devices.is_supported());
        let result = devices.get_user_media(MediaRequest::Audio).await;
        assert_eq!(result.unwrap_err(), DeviceError::NotSupported);
    }

    #[test]
    fn test_tone_amplitude() {
        let feed = SyntheticMicrophoneFeed::new(Tone {
            amplitude: 0.25,
            frequency_hz: 1000.0,
        });
        let mut buf = [0.0f32; 96];
        assert_eq!(feed.copy_latest(&mut buf), 96);
        let peak = buf.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.25 && peak > 0.2);
    }
}
