//! Frame recorder over a borrowed video stream
//!
//! Samples the latest decoded frame at a fixed cadence and keeps each one
//! as a PNG chunk. The recorder never stops the stream it reads from.

use super::state::RecordedClip;
use crate::capture::{StillImage, StreamHandle};
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
}

/// Samples a video stream into a [`RecordedClip`]
pub struct MediaRecorder {
    clip: Arc<ParkingMutex<RecordedClip>>,
    task: Option<JoinHandle<()>>,
}

impl MediaRecorder {
    /// Start sampling `stream` every `interval`
    pub fn start(stream: StreamHandle, interval: Duration) -> Self {
        let clip = Arc::new(ParkingMutex::new(RecordedClip::new()));
        let sink = clip.clone();
        tracing::debug!("Recorder started on stream {}", stream.id());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !stream.is_live() {
                    tracing::debug!("Recorded stream ended, sampling stopped");
                    break;
                }
                let Some(frame) = stream.video_feed().and_then(|feed| feed.latest_frame()) else {
                    continue;
                };
                match StillImage::from_frame(&frame) {
                    Ok(chunk) => sink.lock().chunks.push(chunk),
                    Err(e) => tracing::warn!("Dropping recorder frame: {}", e),
                }
            }
        });

        Self {
            clip,
            task: Some(task),
        }
    }

    pub fn state(&self) -> RecorderState {
        match &self.task {
            Some(_) => RecorderState::Recording,
            None => RecorderState::Inactive,
        }
    }

    /// Stop sampling and hand back the clip; later calls return an empty clip
    pub fn stop(&mut self) -> RecordedClip {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut clip = std::mem::take(&mut *self.clip.lock());
        clip.end();
        tracing::debug!("Recorder stopped with {} chunks", clip.chunk_count());
        clip
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
