//! Rendering surfaces
//!
//! A [`VideoSurface`] is what a stream gets decoded into for display. The
//! webcam probe owns its preview surface and registers it in a
//! [`SurfaceRegistry`] so other components can find a surface already bound
//! to a stream instead of searching ambient state.

use super::frame::Frame;
use super::stream::{StreamHandle, StreamId};
use super::traits::DeviceError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use uuid::Uuid;

/// How much decoded data a surface has
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadyState {
    /// Nothing bound, or the stream has ended
    HaveNothing,
    /// Bound to a live stream but no usable frame yet
    HaveMetadata,
    /// A frame with non-zero dimensions is available
    HaveEnoughData,
}

/// A surface a stream can be bound to
pub struct VideoSurface {
    id: Uuid,
    label: String,
    hidden: bool,
    bound: RwLock<Option<StreamHandle>>,
    binding_tx: watch::Sender<Option<StreamId>>,
}

impl VideoSurface {
    /// A visible surface, e.g. the webcam preview
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(label.into(), false))
    }

    /// An off-screen surface already bound to `stream`
    pub fn hidden(stream: StreamHandle) -> Arc<Self> {
        let surface = Self::build(format!("hidden:{}", stream.id()), true);
        surface.bind(stream);
        Arc::new(surface)
    }

    fn build(label: String, hidden: bool) -> Self {
        let (binding_tx, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            label,
            hidden,
            bound: RwLock::new(None),
            binding_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Attach a stream, replacing whatever was bound before
    pub fn bind(&self, stream: StreamHandle) {
        let id = stream.id();
        *self.bound.write() = Some(stream);
        self.binding_tx.send_replace(Some(id));
    }

    pub fn unbind(&self) {
        *self.bound.write() = None;
        self.binding_tx.send_replace(None);
    }

    pub fn bound_stream(&self) -> Option<StreamId> {
        self.bound.read().as_ref().map(|s| s.id())
    }

    pub fn ready_state(&self) -> ReadyState {
        let bound = self.bound.read();
        let Some(stream) = bound.as_ref().filter(|s| s.is_live()) else {
            return ReadyState::HaveNothing;
        };
        match stream.video_feed().and_then(|feed| feed.dimensions()) {
            Some((w, h)) if w > 0 && h > 0 => ReadyState::HaveEnoughData,
            _ => ReadyState::HaveMetadata,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::HaveEnoughData
    }

    /// Resolve once the surface has a decodable frame.
    ///
    /// Fails with [`DeviceError::Stopped`] if the stream ends or is unbound
    /// first.
    pub async fn wait_ready(&self) -> Result<(), DeviceError> {
        let stream = self.bound.read().clone().ok_or(DeviceError::Stopped)?;
        let feed = stream.video_feed().ok_or(DeviceError::NotSupported)?;
        let mut frames = feed.frames();
        let mut ended = stream.ended();
        let mut binding = self.binding_tx.subscribe();

        loop {
            if !stream.is_live() || self.bound_stream() != Some(stream.id()) {
                return Err(DeviceError::Stopped);
            }
            if self.is_ready() {
                return Ok(());
            }
            tokio::select! {
                changed = frames.changed() => changed.map_err(|_| DeviceError::Stopped)?,
                _ = ended.changed() => {}
                _ = binding.changed() => {}
            }
        }
    }

    /// Grab the current frame, if the surface is ready
    pub fn screenshot(&self) -> Option<Frame> {
        let bound = self.bound.read();
        let stream = bound.as_ref().filter(|s| s.is_live())?;
        stream
            .video_feed()?
            .latest_frame()
            .filter(|frame| !frame.is_empty())
    }
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("label", &self.label)
            .field("hidden", &self.hidden)
            .field("bound", &self.bound_stream())
            .finish()
    }
}

/// Explicit registry of live surfaces
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: Arc<RwLock<Vec<Weak<VideoSurface>>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, surface: &Arc<VideoSurface>) {
        let mut surfaces = self.surfaces.write();
        surfaces.retain(|s| s.strong_count() > 0);
        surfaces.push(Arc::downgrade(surface));
    }

    /// First live surface currently bound to `stream`
    pub fn find_bound(&self, stream: StreamId) -> Option<Arc<VideoSurface>> {
        self.surfaces
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|s| s.bound_stream() == Some(stream))
    }

    pub fn len(&self) -> usize {
        self.surfaces
            .read()
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::MediaStream;
    use crate::capture::synthetic::SyntheticCameraFeed;
    use std::time::Duration;

    fn stream_with(feed: Arc<SyntheticCameraFeed>) -> MediaStream {
        MediaStream::video("test camera", feed)
    }

    #[test]
    fn test_ready_state_follows_binding() {
        let stream = stream_with(Arc::new(SyntheticCameraFeed::new(8, 8, [1, 2, 3])));
        let surface = VideoSurface::new("preview");
        assert_eq!(surface.ready_state(), ReadyState::HaveNothing);

        surface.bind(stream.handle());
        assert_eq!(surface.ready_state(), ReadyState::HaveEnoughData);
        assert!(surface.screenshot().is_some());

        stream.stop();
        assert_eq!(surface.ready_state(), ReadyState::HaveNothing);
        assert!(surface.screenshot().is_none());
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_on_first_frame() {
        let feed = Arc::new(SyntheticCameraFeed::pending(8, 8, [9, 9, 9]));
        let stream = stream_with(feed.clone());
        let surface = VideoSurface::hidden(stream.handle());
        assert_eq!(surface.ready_state(), ReadyState::HaveMetadata);

        let waiter = {
            let surface = surface.clone();
            tokio::spawn(async move { surface.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.deliver_first_frame();

        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_wait_ready_fails_when_stream_stops() {
        let feed = Arc::new(SyntheticCameraFeed::pending(8, 8, [9, 9, 9]));
        let stream = stream_with(feed);
        let surface = VideoSurface::hidden(stream.handle());

        let waiter = {
            let surface = surface.clone();
            tokio::spawn(async move { surface.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.stop();

        assert_eq!(waiter.await.unwrap(), Err(DeviceError::Stopped));
    }

    #[test]
    fn test_registry_finds_bound_surface() {
        let registry = SurfaceRegistry::new();
        let stream = stream_with(Arc::new(SyntheticCameraFeed::new(4, 4, [0, 0, 0])));
        let preview = VideoSurface::new("preview");
        registry.register(&preview);
        assert!(registry.find_bound(stream.id()).is_none());

        preview.bind(stream.handle());
        let found = registry.find_bound(stream.id()).unwrap();
        assert_eq!(found.id(), preview.id());

        drop(found);
        drop(preview);
        assert!(registry.is_empty());
    }
}
