//! Device and network probes
//!
//! Every probe acquires one resource, measures it, and reduces the result to
//! a [`ProbeStatus`]. They share the [`Probe`] contract so the presentation
//! layer can render each one with the same status tile.

pub mod cancel;
pub mod lighting;
pub mod microphone;
pub mod network;
pub mod webcam;

use crate::capture::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use cancel::{CancelReason, CancelToken};
pub use lighting::LightingProbe;
pub use microphone::MicrophoneProbe;
pub use network::{NetworkError, NetworkProbe, NetworkResult};
pub use webcam::WebcamProbe;

/// Outcome of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Measurement or permission prompt in flight
    #[default]
    Checking,
    /// Measurement passed
    Good,
    /// Device access granted
    Granted,
    /// Measurement finished below threshold
    Poor,
    /// The user refused device access
    Denied,
    /// The measurement could not run
    Error,
}

impl ProbeStatus {
    pub fn is_passing(self) -> bool {
        matches!(self, ProbeStatus::Good | ProbeStatus::Granted)
    }

    /// Terminal non-good states get a retry affordance
    pub fn offers_retry(self) -> bool {
        matches!(self, ProbeStatus::Poor | ProbeStatus::Denied | ProbeStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbeStatus::Checking => "Checking...",
            ProbeStatus::Good => "Good",
            ProbeStatus::Granted => "Granted",
            ProbeStatus::Poor => "Poor",
            ProbeStatus::Denied => "Denied",
            ProbeStatus::Error => "Error",
        }
    }
}

impl From<&DeviceError> for ProbeStatus {
    fn from(error: &DeviceError) -> Self {
        match error {
            DeviceError::PermissionDenied => ProbeStatus::Denied,
            _ => ProbeStatus::Error,
        }
    }
}

/// Which probe a status belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Webcam,
    Microphone,
    Network,
    Lighting,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 4] = [
        ProbeKind::Webcam,
        ProbeKind::Microphone,
        ProbeKind::Network,
        ProbeKind::Lighting,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProbeKind::Webcam => "Webcam",
            ProbeKind::Microphone => "Microphone",
            ProbeKind::Network => "Internet Speed",
            ProbeKind::Lighting => "Lighting",
        }
    }
}

/// Uniform view of a probe for a status tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSnapshot {
    pub kind: ProbeKind,
    pub label: String,
    pub status: ProbeStatus,

    /// Measurement summary, absent while checking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Live microphone level, microphone only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_level: Option<f32>,
}

impl ProbeSnapshot {
    pub fn new(kind: ProbeKind, status: ProbeStatus) -> Self {
        Self {
            kind,
            label: kind.label().to_string(),
            status,
            details: None,
            audio_level: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        if self.status != ProbeStatus::Checking {
            self.details = Some(details.into());
        }
        self
    }

    pub fn with_audio_level(mut self, level: f32) -> Self {
        self.audio_level = Some(level);
        self
    }
}

/// Lifecycle shared by every probe
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    fn status(&self) -> ProbeStatus;

    /// Receiver that observes every status change
    fn watch_status(&self) -> watch::Receiver<ProbeStatus>;

    fn snapshot(&self) -> ProbeSnapshot;

    /// Start a fresh check. Returns `false` if the request was ignored.
    async fn retry_check(&self) -> bool;

    /// Release everything the probe holds. Safe to call repeatedly.
    async fn shutdown(&self);
}

/// Wait until `rx` reports a status other than [`ProbeStatus::Checking`]
pub async fn settled(rx: &mut watch::Receiver<ProbeStatus>) -> ProbeStatus {
    let settled = rx.wait_for(|s| *s != ProbeStatus::Checking).await.map(|s| *s);
    match settled {
        Ok(status) => status,
        Err(_) => *rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ProbeStatus::Granted).unwrap(), "\"granted\"");
        assert_eq!(
            serde_json::from_str::<ProbeKind>("\"lighting\"").unwrap(),
            ProbeKind::Lighting
        );
    }

    #[test]
    fn test_retry_affordance() {
        assert!(!ProbeStatus::Checking.offers_retry());
        assert!(!ProbeStatus::Granted.offers_retry());
        assert!(ProbeStatus::Denied.offers_retry());
        assert!(ProbeStatus::Poor.offers_retry());
        assert!(ProbeStatus::Good.is_passing());
        assert!(!ProbeStatus::Poor.is_passing());
    }

    #[test]
    fn test_device_error_classification() {
        assert_eq!(ProbeStatus::from(&DeviceError::PermissionDenied), ProbeStatus::Denied);
        assert_eq!(ProbeStatus::from(&DeviceError::NotSupported), ProbeStatus::Error);
        assert_eq!(
            ProbeStatus::from(&DeviceError::Failure("busy".into())),
            ProbeStatus::Error
        );
    }

    #[test]
    fn test_details_hidden_while_checking() {
        let checking = ProbeSnapshot::new(ProbeKind::Lighting, ProbeStatus::Checking)
            .with_details("Brightness: 12");
        assert_eq!(checking.details, None);

        let done = ProbeSnapshot::new(ProbeKind::Lighting, ProbeStatus::Poor)
            .with_details("Brightness: 12");
        assert_eq!(done.details.as_deref(), Some("Brightness: 12"));
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["label"], "Lighting");
        assert!(json.get("audioLevel").is_none());
    }

    #[tokio::test]
    async fn test_settled_waits_past_checking() {
        let (tx, mut rx) = watch::channel(ProbeStatus::Checking);
        let waiter = tokio::spawn(async move { settled(&mut rx).await });
        tx.send_replace(ProbeStatus::Checking);
        tx.send_replace(ProbeStatus::Denied);
        assert_eq!(waiter.await.unwrap(), ProbeStatus::Denied);
    }

    #[tokio::test]
    async fn test_settled_returns_last_value_when_closed() {
        let (tx, mut rx) = watch::channel(ProbeStatus::Checking);
        drop(tx);
        assert_eq!(settled(&mut rx).await, ProbeStatus::Checking);
    }
}
