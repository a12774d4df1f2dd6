//! Signal analysis
//!
//! Pure math over decoded frames and audio samples. Nothing in here touches
//! a device or a timer.

pub mod luminance;
pub mod spectrum;

pub use luminance::{classify_brightness, mean_luminance, LightingLevel};
pub use spectrum::{AnalyserError, SpectrumAnalyser};
