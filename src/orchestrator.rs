//! System check orchestrator
//!
//! Builds the four probes, wires the lighting probe to the webcam's stream
//! and gates the capture state machine on the critical probes.

use crate::capture::{MediaDevices, SurfaceRegistry};
use crate::config::SystemCheckConfig;
use crate::probe::{
    LightingProbe, MicrophoneProbe, NetworkProbe, Probe, ProbeKind, ProbeSnapshot, WebcamProbe,
};
use crate::recorder::{CaptureCoordinator, CaptureError, CaptureSource, CaptureState};
use crate::utils::CheckResult;
use parking_lot::Mutex as ParkingMutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything the presentation layer renders in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub webcam: ProbeSnapshot,
    pub microphone: ProbeSnapshot,
    pub network: ProbeSnapshot,
    pub lighting: ProbeSnapshot,
    pub capture: CaptureState,
    pub capture_allowed: bool,
    pub has_still: bool,
}

impl SystemStatus {
    pub fn probes(&self) -> [&ProbeSnapshot; 4] {
        [&self.webcam, &self.microphone, &self.network, &self.lighting]
    }
}

/// One system check session
pub struct SystemCheck {
    config: SystemCheckConfig,
    registry: SurfaceRegistry,
    webcam: WebcamProbe,
    microphone: MicrophoneProbe,
    network: NetworkProbe,
    lighting: LightingProbe,
    capture: CaptureCoordinator,
    follower: ParkingMutex<Option<JoinHandle<()>>>,
}

impl SystemCheck {
    /// Validate `config` and build every probe over `devices`
    pub fn new(config: SystemCheckConfig, devices: Arc<dyn MediaDevices>) -> CheckResult<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.network.test_timeout())
            .build()?;

        let registry = SurfaceRegistry::new();
        let webcam = WebcamProbe::new(
            devices.clone(),
            config.webcam.constraints.clone(),
            &registry,
        );
        let microphone = MicrophoneProbe::new(devices, config.microphone.clone());
        let network = NetworkProbe::new(config.network.clone(), client);
        let lighting = LightingProbe::new(config.lighting.clone(), registry.clone());
        let capture = CaptureCoordinator::new(Arc::new(webcam.clone()), config.capture.clone());

        Ok(Self {
            config,
            registry,
            webcam,
            microphone,
            network,
            lighting,
            capture,
            follower: ParkingMutex::new(None),
        })
    }

    /// Activate every probe concurrently and wait for their first attempts.
    /// Lighting starts on its own once the webcam publishes a stream.
    pub async fn start(&self) {
        self.follow_webcam();
        tracing::info!("Starting system check");
        tokio::join!(
            self.webcam.check_access(),
            self.microphone.check_microphone_access(),
            self.network.check_internet_speed(),
        );
        tracing::info!("System check probes settled: {:?}", self.snapshot().probes());
    }

    fn follow_webcam(&self) {
        let mut follower = self.follower.lock();
        if follower.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *follower = Some(self.lighting.follow(self.webcam.watch_stream()));
    }

    pub fn probe(&self, kind: ProbeKind) -> &dyn Probe {
        match kind {
            ProbeKind::Webcam => &self.webcam,
            ProbeKind::Microphone => &self.microphone,
            ProbeKind::Network => &self.network,
            ProbeKind::Lighting => &self.lighting,
        }
    }

    pub fn snapshot(&self) -> SystemStatus {
        SystemStatus {
            webcam: self.webcam.snapshot(),
            microphone: self.microphone.snapshot(),
            network: self.network.snapshot(),
            lighting: self.lighting.snapshot(),
            capture: self.capture.state(),
            capture_allowed: self.capture_allowed(),
            has_still: self.capture.has_still(),
        }
    }

    /// Retry one probe; `false` if the probe ignored the request
    pub async fn retry(&self, kind: ProbeKind) -> bool {
        tracing::info!("Retrying {} check", kind.label());
        if kind == ProbeKind::Webcam {
            self.follow_webcam();
        }
        self.probe(kind).retry_check().await
    }

    /// First critical probe that is not passing
    fn blocking_probe(&self) -> Option<ProbeKind> {
        self.config
            .capture
            .critical_probes
            .iter()
            .copied()
            .find(|kind| !self.probe(*kind).status().is_passing())
    }

    pub fn capture_allowed(&self) -> bool {
        self.blocking_probe().is_none() && self.webcam.is_capture_ready()
    }

    pub fn start_countdown(&self) -> Result<(), CaptureError> {
        if let Some(kind) = self.blocking_probe() {
            return Err(CaptureError::ProbeNotPassing(kind));
        }
        self.capture.start_countdown()
    }

    pub fn start_recording(&self) -> Result<(), CaptureError> {
        if let Some(kind) = self.blocking_probe() {
            return Err(CaptureError::ProbeNotPassing(kind));
        }
        self.capture.start_recording()
    }

    pub fn config(&self) -> &SystemCheckConfig {
        &self.config
    }

    pub fn registry(&self) -> &SurfaceRegistry {
        &self.registry
    }

    pub fn webcam(&self) -> &WebcamProbe {
        &self.webcam
    }

    pub fn microphone(&self) -> &MicrophoneProbe {
        &self.microphone
    }

    pub fn network(&self) -> &NetworkProbe {
        &self.network
    }

    pub fn lighting(&self) -> &LightingProbe {
        &self.lighting
    }

    pub fn capture(&self) -> &CaptureCoordinator {
        &self.capture
    }

    /// Cancel every timer and release every resource. Readers of the webcam
    /// stream stop before the webcam releases it.
    pub async fn shutdown(&self) {
        self.capture.shutdown();
        if let Some(follower) = self.follower.lock().take() {
            follower.abort();
        }
        self.lighting.shutdown().await;
        self.network.shutdown().await;
        self.microphone.shutdown().await;
        self.webcam.shutdown().await;
        tracing::info!("System check shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticDevices, SyntheticOutcome, TrackKind};
    use crate::probe::ProbeStatus;
    use std::time::Duration;

    const UNREACHABLE: &str = "http://127.0.0.1:9/unreachable";

    fn offline_config() -> SystemCheckConfig {
        let mut config = SystemCheckConfig::default();
        config.network.ping_endpoints = vec![UNREACHABLE.to_string()];
        config.network.download_url = UNREACHABLE.to_string();
        config.network.upload_url = UNREACHABLE.to_string();
        config.lighting.stabilization_delay_ms = 10;
        config.capture.countdown_secs = 1;
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = SystemCheckConfig::default();
        config.lighting.dark_threshold = 220;
        let result = SystemCheck::new(config, Arc::new(SyntheticDevices::new()));
        assert_eq!(result.err().map(|e| e.code()), Some("CONFIG_ERROR"));
    }

    #[tokio::test]
    async fn test_start_runs_every_probe() {
        let devices = Arc::new(SyntheticDevices::new());
        let check = SystemCheck::new(offline_config(), devices.clone()).unwrap();

        check.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = check.snapshot();
        assert_eq!(status.webcam.status, ProbeStatus::Granted);
        assert_eq!(status.microphone.status, ProbeStatus::Granted);
        assert_eq!(status.network.status, ProbeStatus::Error);
        assert_eq!(status.lighting.status, ProbeStatus::Good);
        assert_eq!(status.lighting.details.as_deref(), Some("Brightness: 128"));
        assert!(status.capture_allowed);
        assert_eq!(devices.live_streams(TrackKind::Video), 1);

        check.shutdown().await;
        assert_eq!(devices.live_streams(TrackKind::Video), 0);
        assert_eq!(devices.live_streams(TrackKind::Audio), 0);
    }

    #[tokio::test]
    async fn test_countdown_after_grant_takes_still() {
        let devices = Arc::new(SyntheticDevices::new());
        let check = SystemCheck::new(offline_config(), devices).unwrap();
        check.webcam().check_access().await;

        check.start_countdown().unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(check.capture().state(), CaptureState::Idle);
        assert!(check.snapshot().has_still);
        assert!(check.capture().ready_for_assessment());
        check.shutdown().await;
    }

    #[tokio::test]
    async fn test_countdown_blocked_by_denied_webcam() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.push_camera_outcome(SyntheticOutcome::Deny);
        let check = SystemCheck::new(offline_config(), devices).unwrap();
        check.webcam().check_access().await;

        assert_eq!(check.webcam().status(), ProbeStatus::Denied);
        assert_eq!(
            check.start_countdown(),
            Err(CaptureError::ProbeNotPassing(ProbeKind::Webcam))
        );
        assert_eq!(check.capture().state(), CaptureState::Idle);
        assert!(!check.snapshot().capture_allowed);
    }

    #[tokio::test]
    async fn test_extra_critical_probe_gates_capture() {
        let mut config = offline_config();
        config.capture.critical_probes = vec![ProbeKind::Webcam, ProbeKind::Microphone];
        let devices = Arc::new(SyntheticDevices::new());
        devices.push_microphone_outcome(SyntheticOutcome::Fail("busy".into()));
        let check = SystemCheck::new(config, devices).unwrap();

        check.webcam().check_access().await;
        check.microphone().check_microphone_access().await;

        assert_eq!(
            check.start_countdown(),
            Err(CaptureError::ProbeNotPassing(ProbeKind::Microphone))
        );

        assert!(check.retry(ProbeKind::Microphone).await);
        assert_eq!(check.microphone().status(), ProbeStatus::Granted);
        assert!(check.start_countdown().is_ok());
        check.shutdown().await;
    }

    #[tokio::test]
    async fn test_webcam_retry_reaches_lighting() {
        let devices = Arc::new(SyntheticDevices::new());
        let check = SystemCheck::new(offline_config(), devices.clone()).unwrap();
        check.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(check.lighting().status(), ProbeStatus::Good);

        devices.set_camera_color([5, 5, 5]);
        assert!(check.retry(ProbeKind::Webcam).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(check.lighting().status(), ProbeStatus::Poor);
        assert_eq!(devices.live_streams(TrackKind::Video), 1);
        check.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let devices = Arc::new(SyntheticDevices::new());
        let check = SystemCheck::new(offline_config(), devices.clone()).unwrap();
        check.start().await;

        check.shutdown().await;
        check.shutdown().await;
        assert_eq!(check.capture().state(), CaptureState::Idle);
        assert!(!check.lighting().is_sampling());
        assert!(!check.microphone().is_monitoring());
        assert_eq!(devices.live_streams(TrackKind::Video), 0);
    }
}
