//! Network probe
//!
//! One-shot coarse estimate of latency, jitter and throughput. A run has
//! three strictly sequential phases (latency, download, upload) sharing one
//! [`CancelToken`] whose deadline bounds the whole run. Partial results are
//! published after each phase.

use super::cancel::{CancelReason, CancelToken};
use super::{Probe, ProbeKind, ProbeSnapshot, ProbeStatus};
use crate::config::NetworkConfig;
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rand::Rng;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";
const PINGS_PER_ENDPOINT: usize = 3;
const UPLOAD_CHUNK_LIMIT: usize = 10_000;
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Network measurement failure
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("network check cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    Status(reqwest::StatusCode),

    #[error("response body was empty")]
    EmptyBody,

    #[error("all latency tests failed")]
    AllEndpointsFailed,
}

impl From<CancelReason> for NetworkError {
    fn from(reason: CancelReason) -> Self {
        NetworkError::Cancelled(reason)
    }
}

/// Published network measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResult {
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub status: ProbeStatus,
}

impl Default for NetworkResult {
    fn default() -> Self {
        Self {
            download_speed_mbps: 0.0,
            upload_speed_mbps: 0.0,
            latency_ms: 0.0,
            jitter_ms: 0.0,
            status: ProbeStatus::Checking,
        }
    }
}

impl NetworkResult {
    pub fn details(&self) -> String {
        format!(
            "Down: {} Mbps | Up: {} Mbps | Latency: {}ms",
            self.download_speed_mbps, self.upload_speed_mbps, self.latency_ms
        )
    }
}

/// `good` iff download meets its threshold and latency stays within its own
pub fn classify(
    download_mbps: f64,
    latency_ms: f64,
    download_threshold_mbps: f64,
    latency_threshold_ms: f64,
) -> ProbeStatus {
    if download_mbps >= download_threshold_mbps && latency_ms <= latency_threshold_ms {
        ProbeStatus::Good
    } else {
        ProbeStatus::Poor
    }
}

/// Mean latency and mean absolute difference between consecutive samples,
/// both rounded to whole milliseconds
fn summarize_latency(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let jitter = if samples.len() > 1 {
        samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (samples.len() - 1) as f64
    } else {
        0.0
    };
    (mean.round(), jitter.round())
}

fn throughput_mbps(bytes: usize, elapsed_secs: f64) -> f64 {
    let mbps = (bytes as f64 * 8.0) / (elapsed_secs.max(1e-6) * 1_000_000.0);
    (mbps * 100.0).round() / 100.0
}

/// Alphanumeric payload of exactly `size` bytes, built by repeating a random
/// chunk of at most ten thousand characters
fn upload_payload(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let chunk: Vec<u8> = (0..size.min(UPLOAD_CHUNK_LIMIT))
        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())])
        .collect();
    if chunk.is_empty() {
        return chunk;
    }
    chunk.iter().copied().cycle().take(size).collect()
}

struct ActiveRun {
    id: u64,
    token: CancelToken,
}

struct NetworkInner {
    client: reqwest::Client,
    options: NetworkConfig,
    result_tx: watch::Sender<NetworkResult>,
    status_tx: watch::Sender<ProbeStatus>,
    active: ParkingMutex<Option<ActiveRun>>,
    runs: AtomicU64,
}

/// Latency and throughput probe
#[derive(Clone)]
pub struct NetworkProbe {
    inner: Arc<NetworkInner>,
}

impl NetworkProbe {
    pub fn new(options: NetworkConfig, client: reqwest::Client) -> Self {
        let (result_tx, _) = watch::channel(NetworkResult::default());
        let (status_tx, _) = watch::channel(ProbeStatus::Checking);
        Self {
            inner: Arc::new(NetworkInner {
                client,
                options,
                result_tx,
                status_tx,
                active: ParkingMutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Run a full measurement, cancelling any run still in flight
    pub async fn check_internet_speed(&self) {
        let id = self.inner.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancelToken::with_deadline(self.inner.options.test_timeout());
        let previous = self.inner.active.lock().replace(ActiveRun {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel(CancelReason::Superseded);
        }

        self.publish(id, |r| r.status = ProbeStatus::Checking);
        let outcome = self.run(id, &token).await;

        match outcome {
            Ok(result) => {
                tracing::info!(
                    "Network check finished: {} ({:?})",
                    result.details(),
                    result.status
                );
                self.publish(id, |r| *r = result);
            }
            Err(NetworkError::Cancelled(reason @ (CancelReason::Superseded | CancelReason::Shutdown))) => {
                tracing::debug!("Network check run {} stopped: {}", id, reason);
            }
            Err(e) => {
                tracing::error!("Internet speed check error: {}", e);
                self.publish(id, |r| r.status = ProbeStatus::Error);
            }
        }

        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
        }
    }

    async fn run(&self, id: u64, token: &CancelToken) -> Result<NetworkResult, NetworkError> {
        let (latency_ms, jitter_ms) = self.measure_latency(token).await?;
        self.publish(id, |r| {
            r.latency_ms = latency_ms;
            r.jitter_ms = jitter_ms;
        });

        let download_speed_mbps = self.measure_download(token).await?;
        self.publish(id, |r| r.download_speed_mbps = download_speed_mbps);

        let upload_speed_mbps = self.measure_upload(token).await?;

        let options = &self.inner.options;
        Ok(NetworkResult {
            download_speed_mbps,
            upload_speed_mbps,
            latency_ms,
            jitter_ms,
            status: classify(
                download_speed_mbps,
                latency_ms,
                options.download_threshold_mbps,
                options.latency_threshold_ms,
            ),
        })
    }

    /// Ping the first endpoint that answers
    async fn measure_latency(&self, token: &CancelToken) -> Result<(f64, f64), NetworkError> {
        for endpoint in &self.inner.options.ping_endpoints {
            let mut samples = Vec::with_capacity(PINGS_PER_ENDPOINT);
            for _ in 0..PINGS_PER_ENDPOINT {
                let start = Instant::now();
                let request = self
                    .inner
                    .client
                    .head(endpoint)
                    .header(CACHE_CONTROL, NO_CACHE)
                    .send();
                match token.run(request).await? {
                    Ok(_) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
                    Err(e) => {
                        tracing::warn!("Latency test failed for {}: {}", endpoint, e);
                        break;
                    }
                }
            }
            if samples.len() == PINGS_PER_ENDPOINT {
                return Ok(summarize_latency(&samples));
            }
        }
        Err(NetworkError::AllEndpointsFailed)
    }

    async fn measure_download(&self, token: &CancelToken) -> Result<f64, NetworkError> {
        let fallback = self.inner.options.download_fallback_mbps;
        match self.download_once(token).await {
            Ok(mbps) => Ok(mbps),
            Err(NetworkError::Cancelled(reason)) => Err(NetworkError::Cancelled(reason)),
            Err(e) => {
                tracing::warn!("Download speed test error: {}, using {} Mbps", e, fallback);
                Ok(fallback)
            }
        }
    }

    async fn download_once(&self, token: &CancelToken) -> Result<f64, NetworkError> {
        let options = &self.inner.options;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let start = Instant::now();
        let request = self
            .inner
            .client
            .get(&options.download_url)
            .query(&[
                ("bytes", options.download_sample_size.to_string()),
                ("t", timestamp.to_string()),
            ])
            .header(CACHE_CONTROL, NO_CACHE)
            .send();
        let response = token.run(request).await??;
        if !response.status().is_success() {
            return Err(NetworkError::Status(response.status()));
        }
        let body = token.run(response.bytes()).await??;
        if body.is_empty() {
            return Err(NetworkError::EmptyBody);
        }
        Ok(throughput_mbps(body.len(), start.elapsed().as_secs_f64()))
    }

    async fn measure_upload(&self, token: &CancelToken) -> Result<f64, NetworkError> {
        let options = &self.inner.options;
        let payload = upload_payload(options.upload_sample_size);

        let mut result = self.upload_once(token, &options.upload_url, &payload).await;
        if let (Err(e), Some(fallback_url)) = (&result, &options.upload_fallback_url) {
            if !matches!(e, NetworkError::Cancelled(_)) {
                tracing::warn!("Local upload endpoint unavailable ({}), trying {}", e, fallback_url);
                result = self.upload_once(token, fallback_url, &payload).await;
            }
        }

        match result {
            Ok(mbps) => Ok(mbps),
            Err(NetworkError::Cancelled(reason)) => Err(NetworkError::Cancelled(reason)),
            Err(e) => {
                let fallback = options.upload_fallback_mbps;
                tracing::warn!("Upload speed test error: {}, using {} Mbps", e, fallback);
                Ok(fallback)
            }
        }
    }

    async fn upload_once(
        &self,
        token: &CancelToken,
        url: &str,
        payload: &[u8],
    ) -> Result<f64, NetworkError> {
        let start = Instant::now();
        let request = self
            .inner
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send();
        let response = token.run(request).await??;
        if !response.status().is_success() {
            return Err(NetworkError::Status(response.status()));
        }
        Ok(throughput_mbps(payload.len(), start.elapsed().as_secs_f64()))
    }

    /// Apply `update` if run `id` is still the active one
    fn publish(&self, id: u64, update: impl FnOnce(&mut NetworkResult)) {
        let active = self.inner.active.lock();
        if !active.as_ref().is_some_and(|run| run.id == id) {
            return;
        }
        self.inner.result_tx.send_modify(update);
        let status = self.inner.result_tx.borrow().status;
        self.inner.status_tx.send_replace(status);
    }

    pub fn result(&self) -> NetworkResult {
        *self.inner.result_tx.borrow()
    }

    pub fn watch_result(&self) -> watch::Receiver<NetworkResult> {
        self.inner.result_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.lock().is_some()
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Network
    }

    fn status(&self) -> ProbeStatus {
        *self.inner.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ProbeStatus> {
        self.inner.status_tx.subscribe()
    }

    fn snapshot(&self) -> ProbeSnapshot {
        let result = self.result();
        ProbeSnapshot::new(ProbeKind::Network, result.status).with_details(result.details())
    }

    async fn retry_check(&self) -> bool {
        if self.is_running() {
            tracing::debug!("Network check already running, ignoring retry");
            return false;
        }
        self.check_internet_speed().await;
        true
    }

    async fn shutdown(&self) {
        let active = self.inner.active.lock().take();
        if let Some(run) = active {
            run.token.cancel(CancelReason::Shutdown);
        }
    }
}
