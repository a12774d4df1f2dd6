//! Capture trait definitions
//!
//! Platform-agnostic seam between the probes and whatever actually owns the
//! camera and microphone.

use super::frame::Frame;
use super::stream::MediaStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Failure to acquire or read a media device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("media devices are not supported")]
    NotSupported,

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device failure: {0}")]
    Failure(String),

    #[error("stream stopped")]
    Stopped,
}

/// Which way the camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Preferred camera format; backends pick the closest they support
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub frame_rate: u32,
    pub facing_mode: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 360,
            frame_rate: 30,
            facing_mode: FacingMode::User,
        }
    }
}

/// What a caller asks the device layer for
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRequest {
    /// Camera only
    Video(VideoConstraints),
    /// Microphone only
    Audio,
}

impl MediaRequest {
    pub fn kind(&self) -> TrackKind {
        match self {
            MediaRequest::Video(_) => TrackKind::Video,
            MediaRequest::Audio => TrackKind::Audio,
        }
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Access to the user's media devices
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether this platform can hand out media streams at all
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask for a stream; may suspend on a permission prompt
    async fn get_user_media(&self, request: MediaRequest) -> Result<MediaStream, DeviceError>;
}

/// Decoded video coming out of a camera stream
pub trait VideoFeed: Send + Sync {
    /// Dimensions of the most recent frame, if one has been decoded
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Copy of the most recent decoded frame
    fn latest_frame(&self) -> Option<Frame>;

    /// Counter bumped every time a frame lands
    fn frames(&self) -> watch::Receiver<u64>;
}

/// Time-domain samples coming out of a microphone stream
pub trait AudioFeed: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Fill `out` with the most recent mono samples, oldest first.
    ///
    /// Returns how many samples were real; the rest are left as silence.
    fn copy_latest(&self, out: &mut [f32]) -> usize;
}
