//! Capture state management
//!
//! Defines the capture/record state machine and the recorded clip.

use crate::capture::StillImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of the capture system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "remaining")]
pub enum CaptureState {
    /// Nothing in progress
    Idle,
    /// Counting down to a still capture, seconds remaining
    Countdown(u8),
    /// Bounded recording window in progress
    Recording,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::Idle
    }
}

impl CaptureState {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Output of one recording window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedClip {
    pub id: Uuid,

    /// Wall clock time when recording started
    pub started_at: DateTime<Utc>,

    /// Wall clock time when the recorder was stopped
    pub ended_at: DateTime<Utc>,

    /// Frames sampled while recording, oldest first
    #[serde(skip)]
    pub chunks: Vec<StillImage>,
}

impl RecordedClip {
    /// Start an empty clip now
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            ended_at: now,
            chunks: Vec::new(),
        }
    }

    /// Seal the clip
    pub fn end(&mut self) {
        self.ended_at = Utc::now();
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for RecordedClip {
    fn default() -> Self {
        Self::new()
    }
}
