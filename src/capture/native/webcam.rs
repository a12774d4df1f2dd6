//! Webcam capture using nokhwa
//!
//! The camera is opened on its own thread, which keeps decoding frames into a
//! shared slot until the owning stream is stopped.

use super::{classify_backend_error, join_capture_thread, reap_capture_thread};
use crate::capture::frame::Frame;
use crate::capture::stream::MediaStream;
use crate::capture::traits::{DeviceError, VideoConstraints, VideoFeed};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Frames decoded by the capture thread
struct NokhwaFeed {
    latest: ParkingMutex<Option<Frame>>,
    frames_tx: watch::Sender<u64>,
}

impl NokhwaFeed {
    fn new() -> Self {
        let (frames_tx, _) = watch::channel(0);
        Self {
            latest: ParkingMutex::new(None),
            frames_tx,
        }
    }

    fn push(&self, frame: Frame) {
        *self.latest.lock() = Some(frame);
        self.frames_tx.send_modify(|n| *n += 1);
    }
}

impl VideoFeed for NokhwaFeed {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.latest.lock().as_ref().map(|f| (f.width, f.height))
    }

    fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }

    fn frames(&self) -> watch::Receiver<u64> {
        self.frames_tx.subscribe()
    }
}

fn camera_index(camera: Option<String>) -> CameraIndex {
    match camera {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id),
        },
        None => CameraIndex::Index(0),
    }
}

/// Open the camera and start decoding frames
pub async fn open(
    camera: Option<String>,
    constraints: VideoConstraints,
) -> Result<MediaStream, DeviceError> {
    let index = camera_index(camera);
    let feed = Arc::new(NokhwaFeed::new());
    let running = Arc::new(AtomicBool::new(true));
    let (opened_tx, opened_rx) = oneshot::channel::<Result<String, DeviceError>>();

    let thread_feed = feed.clone();
    let thread_running = running.clone();
    let handle = std::thread::spawn(move || {
        let wanted = CameraFormat::new(
            Resolution::new(constraints.ideal_width, constraints.ideal_height),
            FrameFormat::MJPEG,
            constraints.frame_rate,
        );
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = match Camera::new(index.clone(), format) {
            Ok(c) => c,
            Err(e) => {
                let _ = opened_tx.send(Err(classify_backend_error(e.to_string())));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = opened_tx.send(Err(classify_backend_error(e.to_string())));
            return;
        }

        let actual = camera.camera_format();
        tracing::info!(
            "Webcam opened: {}x{} @ {}fps (requested {}x{} @ {}fps)",
            actual.resolution().width(),
            actual.resolution().height(),
            actual.frame_rate(),
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.frame_rate
        );
        let _ = opened_tx.send(Ok(camera.info().human_name()));

        while thread_running.load(Ordering::SeqCst) {
            match camera.frame().and_then(|buffer| buffer.decode_image::<RgbFormat>()) {
                Ok(image) => {
                    let (width, height) = (image.width(), image.height());
                    thread_feed.push(Frame::from_rgb(width, height, image.as_raw()));
                }
                Err(e) => tracing::debug!("Failed to capture webcam frame: {:?}", e),
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
        tracing::info!("Webcam capture thread stopped");
    });

    let label = match opened_rx.await {
        Ok(Ok(label)) => label,
        Ok(Err(e)) => {
            reap_capture_thread(handle).await;
            return Err(e);
        }
        Err(_) => {
            reap_capture_thread(handle).await;
            return Err(DeviceError::Failure("camera thread exited".to_string()));
        }
    };

    Ok(MediaStream::video(label, feed).on_release(move || {
        running.store(false, Ordering::SeqCst);
        join_capture_thread(handle);
    }))
}
