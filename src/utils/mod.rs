//! Shared utilities

pub mod error;

pub use error::{CheckError, CheckResult};
