//! Capture/record module
//!
//! - CaptureSource trait for whatever can hand out stills and a stream
//! - CaptureCoordinator for the countdown and recording state machine
//! - MediaRecorder sampling a borrowed stream into PNG chunks

pub mod coordinator;
pub mod media_recorder;
pub mod state;

pub use coordinator::{CaptureCoordinator, CaptureError, CaptureEvent};
pub use media_recorder::{MediaRecorder, RecorderState};
pub use state::{CaptureState, RecordedClip};

use crate::capture::{StillImage, StreamHandle};
use crate::utils::CheckResult;

/// A camera the coordinator can capture from
pub trait CaptureSource: Send + Sync {
    /// Access granted and the rendering surface has a frame
    fn is_capture_ready(&self) -> bool;

    /// Take a still from the current frame
    fn capture_still(&self) -> CheckResult<StillImage>;

    /// Live stream to record from, if any
    fn stream(&self) -> Option<StreamHandle>;
}
