//! Microphone capture using cpal
//!
//! Input samples are downmixed to mono and kept in a bounded ring so the
//! analyser can always read the most recent window.

use super::{classify_backend_error, join_capture_thread, reap_capture_thread};
use crate::capture::stream::MediaStream;
use crate::capture::traits::{AudioFeed, DeviceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Largest analysis window the analyser supports
const RING_CAPACITY: usize = 32_768;

struct RingFeed {
    sample_rate: u32,
    samples: ParkingMutex<VecDeque<f32>>,
}

impl RingFeed {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: ParkingMutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Append interleaved samples, averaging channels
    fn push_interleaved(&self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        let mut ring = self.samples.lock();
        for frame in data.chunks(channels) {
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(frame.iter().sum::<f32>() / frame.len() as f32);
        }
    }
}

impl AudioFeed for RingFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn copy_latest(&self, out: &mut [f32]) -> usize {
        let ring = self.samples.lock();
        let available = ring.len().min(out.len());
        let pad = out.len() - available;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..].iter_mut().zip(ring.iter().skip(ring.len() - available)) {
            *dst = *src;
        }
        available
    }
}

/// Open the default input device and start filling the ring
pub async fn open() -> Result<MediaStream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DeviceError::NotFound("no default input device".to_string()))?;
    let label = device.name().unwrap_or_else(|_| "Microphone".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| classify_backend_error(e.to_string()))?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let feed = Arc::new(RingFeed::new(sample_rate));
    let running = Arc::new(AtomicBool::new(true));
    let (opened_tx, opened_rx) = oneshot::channel::<Result<(), DeviceError>>();

    let thread_feed = feed.clone();
    let thread_running = running.clone();
    // cpal streams are not Send, so the stream lives and dies on this thread
    let handle = std::thread::spawn(move || {
        let stream = device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                thread_feed.push_interleaved(data, channels);
            },
            |err| tracing::error!("Microphone stream error: {}", err),
            None,
        );
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = opened_tx.send(Err(classify_backend_error(e.to_string())));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = opened_tx.send(Err(classify_backend_error(e.to_string())));
            return;
        }
        let _ = opened_tx.send(Ok(()));

        while thread_running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
        }
        drop(stream);
        tracing::info!("Microphone capture thread stopped");
    });

    match opened_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            reap_capture_thread(handle).await;
            return Err(e);
        }
        Err(_) => {
            reap_capture_thread(handle).await;
            return Err(DeviceError::Failure("microphone thread exited".to_string()));
        }
    }

    tracing::info!("Microphone opened: {} ({}Hz, {}ch)", label, sample_rate, channels);
    Ok(MediaStream::audio(label, feed).on_release(move || {
        running.store(false, Ordering::SeqCst);
        join_capture_thread(handle);
    }))
}
