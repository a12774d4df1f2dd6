//! System Check - pre-assessment device and network diagnostics.
//!
//! This is the library crate behind the system check wizard. It provides
//! the webcam, microphone, network and lighting probes, the capture state
//! machine, and the [`SystemCheck`] orchestrator that composes them.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod orchestrator;
pub mod probe;
pub mod recorder;
pub mod utils;

pub use config::SystemCheckConfig;
pub use orchestrator::{SystemCheck, SystemStatus};
pub use probe::{Probe, ProbeKind, ProbeSnapshot, ProbeStatus};
pub use utils::{CheckError, CheckResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "system_check=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("System check v{}", env!("CARGO_PKG_VERSION"));
}
