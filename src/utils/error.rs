//! Error types and handling
//!
//! Errors that cross the crate edge. Probe-internal failures never reach
//! this type; they are folded into a probe status at the probe boundary.

use crate::config::ConfigError;
use thiserror::Error;

/// Crate-level error type
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Capture error: {0}")]
    Capture(String),
}

impl CheckError {
    /// Stable machine-readable code for the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            CheckError::Config(_) => "CONFIG_ERROR",
            CheckError::Http(_) => "HTTP_ERROR",
            CheckError::Capture(_) => "CAPTURE_ERROR",
        }
    }
}

/// Result type alias using CheckError
pub type CheckResult<T> = Result<T, CheckError>;
