//! Media capture
//!
//! Device acquisition, owned streams, rendering surfaces and the backends
//! that produce frames and samples.

pub mod frame;
pub mod stream;
pub mod surface;
pub mod synthetic;
pub mod traits;

#[cfg(any(feature = "native-webcam", feature = "native-audio"))]
pub mod native;

pub use frame::{Frame, StillImage};
pub use stream::{MediaStream, MediaTrack, StreamHandle, StreamId};
pub use surface::{ReadyState, SurfaceRegistry, VideoSurface};
pub use synthetic::{SyntheticDevices, SyntheticOutcome, Tone};
pub use traits::{
    AudioFeed, DeviceError, FacingMode, MediaDevices, MediaRequest, TrackKind, VideoConstraints,
    VideoFeed,
};
