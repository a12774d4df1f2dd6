//! Media streams
//!
//! A [`MediaStream`] is the single owner of an acquired device stream. Only
//! the owner can stop it. Everything else gets a [`StreamHandle`], a cheap
//! read-only view that can watch frames but never release the tracks.

use super::traits::{AudioFeed, TrackKind, VideoFeed};
use parking_lot::Mutex as ParkingMutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Identity of a stream, stable across handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single track within a stream
#[derive(Debug)]
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    ended: AtomicBool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

struct StreamShared {
    id: StreamId,
    tracks: Vec<MediaTrack>,
    video: Option<Arc<dyn VideoFeed>>,
    audio: Option<Arc<dyn AudioFeed>>,
    release: ParkingMutex<Option<ReleaseHook>>,
    ended_tx: watch::Sender<bool>,
}

/// Owned device stream
pub struct MediaStream {
    shared: Arc<StreamShared>,
}

impl MediaStream {
    /// Wrap a camera feed
    pub fn video(label: impl Into<String>, feed: Arc<dyn VideoFeed>) -> Self {
        Self::new(
            vec![MediaTrack::new(TrackKind::Video, label)],
            Some(feed),
            None,
        )
    }

    /// Wrap a microphone feed
    pub fn audio(label: impl Into<String>, feed: Arc<dyn AudioFeed>) -> Self {
        Self::new(
            vec![MediaTrack::new(TrackKind::Audio, label)],
            None,
            Some(feed),
        )
    }

    fn new(
        tracks: Vec<MediaTrack>,
        video: Option<Arc<dyn VideoFeed>>,
        audio: Option<Arc<dyn AudioFeed>>,
    ) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(StreamShared {
                id: StreamId::new(),
                tracks,
                video,
                audio,
                release: ParkingMutex::new(None),
                ended_tx,
            }),
        }
    }

    /// Run `hook` once when the stream is stopped, to release the device
    pub fn on_release(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.shared.release.lock() = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    /// Read-only view for dependents
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn audio_feed(&self) -> Option<Arc<dyn AudioFeed>> {
        self.shared.audio.clone()
    }

    pub fn video_feed(&self) -> Option<Arc<dyn VideoFeed>> {
        self.shared.video.clone()
    }

    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Stop every track and release the device. Safe to call repeatedly.
    pub fn stop(&self) {
        for track in &self.shared.tracks {
            track.ended.store(true, Ordering::SeqCst);
        }
        let hook = self.shared.release.lock().take();
        if let Some(hook) = hook {
            hook();
            tracing::debug!("Released media stream {}", self.shared.id);
        }
        self.shared.ended_tx.send_replace(true);
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.shared.id)
            .field("live", &self.is_live())
            .finish()
    }
}

impl StreamShared {
    fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_ended())
    }
}

/// Read-only reference to a stream owned elsewhere
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.shared.tracks
    }

    pub fn video_feed(&self) -> Option<Arc<dyn VideoFeed>> {
        self.shared.video.clone()
    }

    /// Flips to `true` once the owner stops the stream
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.shared.ended_tx.subscribe()
    }
}

impl PartialEq for StreamHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCameraFeed;
    use std::sync::atomic::AtomicUsize;

    fn camera_stream() -> MediaStream {
        MediaStream::video("test camera", Arc::new(SyntheticCameraFeed::new(4, 4, [0, 0, 0])))
    }

    #[test]
    fn test_stop_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let stream = camera_stream().on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        stream.stop();
        stream.stop();

        assert!(!stream.is_live());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_device() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let stream = camera_stream().on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handle = stream.handle();

        drop(stream);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!handle.is_live());
        assert!(*handle.ended().borrow());
    }

    #[test]
    fn test_handle_tracks_owner_state() {
        let stream = camera_stream();
        let handle = stream.handle();
        assert_eq!(handle.id(), stream.id());
        assert!(handle.is_live());
        assert_eq!(handle.tracks()[0].kind(), TrackKind::Video);

        stream.stop();
        assert!(handle.tracks()[0].is_ended());
    }
}
