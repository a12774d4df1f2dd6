//! System check configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations are stored in milliseconds and exposed as [`Duration`]s.

use crate::capture::VideoConstraints;
use crate::probe::ProbeKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for a system check session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemCheckConfig {
    pub webcam: WebcamConfig,
    pub microphone: MicrophoneConfig,
    pub network: NetworkConfig,
    pub lighting: LightingConfig,
    pub capture: CaptureConfig,
}

impl SystemCheckConfig {
    /// Load a JSON config file and validate it
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.microphone.validate()?;
        self.network.validate()?;
        self.lighting.validate()?;
        self.capture.validate()?;
        Ok(())
    }
}

/// Camera request settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebcamConfig {
    pub constraints: VideoConstraints,
}

/// Microphone monitoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicrophoneConfig {
    /// How long to monitor audio in ms (0 for continuous)
    pub monitor_duration_ms: u64,

    /// FFT size for frequency analysis (power of 2)
    pub fft_size: usize,

    /// Smoothing factor for audio analysis (0-1)
    pub smoothing_time_constant: f32,

    /// Sampling cadence of the level meter, one display frame by default
    pub frame_interval_ms: u64,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            monitor_duration_ms: 0,
            fft_size: 256,
            smoothing_time_constant: 0.8,
            frame_interval_ms: 16,
        }
    }
}

impl MicrophoneConfig {
    pub fn monitor_duration(&self) -> Option<Duration> {
        (self.monitor_duration_ms > 0).then(|| Duration::from_millis(self.monitor_duration_ms))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(ConfigError::Invalid(format!(
                "microphone.fftSize must be a power of two in 32..=32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(ConfigError::Invalid(format!(
                "microphone.smoothingTimeConstant must be within 0..=1, got {}",
                self.smoothing_time_constant
            )));
        }
        Ok(())
    }
}

/// Network speed test settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// Size in bytes for download test
    pub download_sample_size: u64,

    /// Size in bytes for upload test
    pub upload_sample_size: usize,

    /// Minimum Mbps for "good" status
    pub download_threshold_mbps: f64,

    /// Maximum ms for "good" status
    pub latency_threshold_ms: f64,

    /// Endpoints to ping for the latency test, tried in order
    pub ping_endpoints: Vec<String>,

    /// Payload served for the download test
    pub download_url: String,

    /// Local upload sink
    pub upload_url: String,

    /// Third-party upload sink used when the local one is unavailable
    pub upload_fallback_url: Option<String>,

    /// Deadline for the whole run in ms
    pub test_timeout_ms: u64,

    /// Reported download speed when the download phase fails
    pub download_fallback_mbps: f64,

    /// Reported upload speed when the upload phase fails
    pub upload_fallback_mbps: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            download_sample_size: 1_000_000,
            upload_sample_size: 500_000,
            download_threshold_mbps: 2.0,
            latency_threshold_ms: 200.0,
            ping_endpoints: vec![
                "https://httpbin.org/status/200".to_string(),
                "https://www.google.com".to_string(),
                "https://www.cloudflare.com".to_string(),
            ],
            download_url: "https://speed.cloudflare.com/__down".to_string(),
            upload_url: "http://localhost:3000/api/upload-test".to_string(),
            upload_fallback_url: None,
            test_timeout_ms: 10_000,
            download_fallback_mbps: 1.0,
            upload_fallback_mbps: 0.5,
        }
    }
}

impl NetworkConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "network.pingEndpoints must list at least one endpoint".to_string(),
            ));
        }
        if self.download_sample_size == 0 || self.upload_sample_size == 0 {
            return Err(ConfigError::Invalid(
                "network sample sizes must be greater than zero".to_string(),
            ));
        }
        if self.test_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.testTimeoutMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lighting check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightingConfig {
    /// Below this value is considered too dark
    pub dark_threshold: u8,

    /// Above this value is considered too bright
    pub bright_threshold: u8,

    /// How often to check lighting in ms (0 samples once)
    pub sample_interval_ms: u64,

    /// Time to wait for the camera to stabilize in ms
    pub stabilization_delay_ms: u64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            dark_threshold: 50,
            bright_threshold: 200,
            sample_interval_ms: 1000,
            stabilization_delay_ms: 500,
        }
    }
}

impl LightingConfig {
    pub fn sample_interval(&self) -> Option<Duration> {
        (self.sample_interval_ms > 0).then(|| Duration::from_millis(self.sample_interval_ms))
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dark_threshold >= self.bright_threshold {
            return Err(ConfigError::Invalid(format!(
                "lighting.darkThreshold ({}) must be below brightThreshold ({})",
                self.dark_threshold, self.bright_threshold
            )));
        }
        Ok(())
    }
}

/// Capture and record settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Countdown length before the still is taken
    pub countdown_secs: u8,

    /// Length of the bounded recording window in ms
    pub recording_window_ms: u64,

    /// Cadence at which the recorder samples frames in ms
    pub recorder_frame_interval_ms: u64,

    /// Probes that must pass before a capture may start
    pub critical_probes: Vec<ProbeKind>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            recording_window_ms: 5000,
            recorder_frame_interval_ms: 200,
            critical_probes: vec![ProbeKind::Webcam],
        }
    }
}

impl CaptureConfig {
    pub fn recording_window(&self) -> Duration {
        Duration::from_millis(self.recording_window_ms)
    }

    pub fn recorder_frame_interval(&self) -> Duration {
        Duration::from_millis(self.recorder_frame_interval_ms.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.countdown_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.countdownSecs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
