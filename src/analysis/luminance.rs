//! Frame brightness

use crate::capture::Frame;
use serde::{Deserialize, Serialize};

/// Where a brightness value falls relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LightingLevel {
    TooDark,
    Adequate,
    TooBright,
}

impl LightingLevel {
    pub fn is_adequate(self) -> bool {
        self == LightingLevel::Adequate
    }
}

/// Mean perceptual luminance of a frame, rounded to an integer.
///
/// Uses the Rec. 601 weights `0.299R + 0.587G + 0.114B`. An empty frame
/// reads as black.
pub fn mean_luminance(frame: &Frame) -> u8 {
    let pixels = frame.pixel_count();
    if pixels == 0 {
        return 0;
    }

    let total: f64 = frame
        .data
        .chunks_exact(4)
        .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
        .sum();

    (total / pixels as f64).round().clamp(0.0, 255.0) as u8
}

/// Classify a brightness value; values equal to a threshold are adequate
pub fn classify_brightness(value: u8, dark_threshold: u8, bright_threshold: u8) -> LightingLevel {
    if value < dark_threshold {
        LightingLevel::TooDark
    } else if value > bright_threshold {
        LightingLevel::TooBright
    } else {
        LightingLevel::Adequate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame_is_too_dark() {
        let value = mean_luminance(&Frame::filled(16, 9, [0, 0, 0]));
        assert_eq!(value, 0);
        assert_eq!(classify_brightness(value, 50, 200), LightingLevel::TooDark);
    }

    #[test]
    fn test_white_frame_is_too_bright() {
        let value = mean_luminance(&Frame::filled(16, 9, [255, 255, 255]));
        assert_eq!(value, 255);
        assert_eq!(classify_brightness(value, 50, 200), LightingLevel::TooBright);
    }

    #[test]
    fn test_mid_grey_is_adequate() {
        let value = mean_luminance(&Frame::filled(16, 9, [128, 128, 128]));
        assert_eq!(value, 128);
        assert!(classify_brightness(value, 50, 200).is_adequate());
    }

    #[test]
    fn test_channel_weights() {
        // Pure green carries most of the perceived brightness
        assert_eq!(mean_luminance(&Frame::filled(2, 2, [0, 255, 0])), 150);
        assert_eq!(mean_luminance(&Frame::filled(2, 2, [0, 0, 255])), 29);
    }

    #[test]
    fn test_threshold_values_are_adequate() {
        assert!(classify_brightness(50, 50, 200).is_adequate());
        assert!(classify_brightness(200, 50, 200).is_adequate());
    }

    #[test]
    fn test_empty_frame_reads_black() {
        let frame = Frame {
            width: 0,
            height: 0,
            data: Vec::new(),
        };
        assert_eq!(mean_luminance(&frame), 0);
    }
}
