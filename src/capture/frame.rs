//! Raster frames and still captures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An RGBA8 raster decoded from a video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA pixels, four bytes each
    pub data: Vec<u8>,
}

impl Frame {
    /// A frame where every pixel has the same colour
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel = [rgb[0], rgb[1], rgb[2], 255];
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { width, height, data }
    }

    /// Build a frame from packed RGB24 bytes
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for px in rgb.chunks_exact(3) {
            data.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        Self { width, height, data }
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Encode the frame as a PNG image
    pub fn encode_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.data)?;
        }
        Ok(out)
    }
}

/// A still photo taken from the webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StillImage {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,

    /// PNG-encoded image bytes
    #[serde(skip)]
    pub png: Vec<u8>,
}

impl StillImage {
    /// Encode `frame` into a new still taken now
    pub fn from_frame(frame: &Frame) -> Result<Self, png::EncodingError> {
        Ok(Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            width: frame.width,
            height: frame.height,
            png: frame.encode_png()?,
        })
    }

    /// Suggested file name when the still is saved
    pub fn file_name(&self) -> String {
        format!(
            "webcam-capture-{}.png",
            self.captured_at.format("%Y-%m-%dT%H-%M-%S")
        )
    }
}
