//! Hardware-backed media devices
//!
//! Camera access goes through nokhwa and microphone access through cpal.
//! Both run their device loop on a dedicated thread; the stream's release
//! hook flips the stop flag and joins that thread off the async workers.

#[cfg(feature = "native-audio")]
pub mod microphone;
#[cfg(feature = "native-webcam")]
pub mod webcam;

use super::stream::MediaStream;
use super::traits::{DeviceError, MediaDevices, MediaRequest};
use async_trait::async_trait;

/// Media devices backed by the host's real camera and microphone
#[derive(Debug, Default, Clone)]
pub struct NativeDevices {
    /// Camera index or name; `None` picks the first camera
    pub camera: Option<String>,
}

impl NativeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(camera: impl Into<String>) -> Self {
        Self {
            camera: Some(camera.into()),
        }
    }
}

#[async_trait]
impl MediaDevices for NativeDevices {
    fn is_supported(&self) -> bool {
        cfg!(any(feature = "native-webcam", feature = "native-audio"))
    }

    async fn get_user_media(&self, request: MediaRequest) -> Result<MediaStream, DeviceError> {
        match request {
            #[cfg(feature = "native-webcam")]
            MediaRequest::Video(constraints) => {
                webcam::open(self.camera.clone(), constraints).await
            }
            #[cfg(feature = "native-audio")]
            MediaRequest::Audio => microphone::open().await,
            #[allow(unreachable_patterns)]
            _ => Err(DeviceError::NotSupported),
        }
    }
}

/// Join a capture thread without blocking a runtime worker
pub(crate) fn join_capture_thread(handle: std::thread::JoinHandle<()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(move || {
                if handle.join().is_err() {
                    tracing::warn!("Capture thread panicked");
                }
            });
        }
        Err(_) => {
            if handle.join().is_err() {
                tracing::warn!("Capture thread panicked");
            }
        }
    }
}

/// Wait for a capture thread that failed to open
pub(crate) async fn reap_capture_thread(handle: std::thread::JoinHandle<()>) {
    if let Ok(Err(_)) = tokio::task::spawn_blocking(move || handle.join()).await {
        tracing::warn!("Capture thread panicked");
    }
}

/// Map a backend error message onto the device error taxonomy
pub(crate) fn classify_backend_error(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("not authorized") || lower.contains("denied") {
        DeviceError::PermissionDenied
    } else if lower.contains("not found") || lower.contains("no device") {
        DeviceError::NotFound(message)
    } else {
        DeviceError::Failure(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_backend_error() {
        assert_eq!(
            classify_backend_error("Camera access not authorized".into()),
            DeviceError::PermissionDenied
        );
        assert!(matches!(
            classify_backend_error("device not found: 3".into()),
            DeviceError::NotFound(_)
        ));
        assert!(matches!(
            classify_backend_error("stream broke".into()),
            DeviceError::Failure(_)
        ));
    }

    #[test]
    fn test_join_outside_runtime_waits() {
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = done.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        join_capture_thread(handle);
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_join_inside_runtime_does_not_block() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let handle = std::thread::spawn(move || {
            let _ = release_rx.recv();
            let _ = done_tx.send(());
        });

        // would deadlock the only worker if it joined inline
        join_capture_thread(handle);
        release_tx.send(()).unwrap();
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_reap_waits_for_thread() {
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = done.clone();
        let handle = std::thread::spawn(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        reap_capture_thread(handle).await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
