use frame_describe_common::snapshot::{EncodedSnapshot, JPEG_MIME};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use tracing::debug;

use crate::camera::VideoFrame;

/// Downsamples and JPEG-compresses captured frames.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotEncoder {
    scale: f32,
    /// JPEG quality on the codec's 1..=100 scale.
    jpeg_quality: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("scale must be in (0, 1], got {0}")]
    InvalidScale(f32),
    #[error("quality must be in [0, 1], got {0}")]
    InvalidQuality(f32),
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

impl SnapshotEncoder {
    /// `scale` shrinks each dimension, `quality` is the usual 0..1 lossy knob.
    pub fn new(scale: f32, quality: f32) -> Result<Self, EncodeError> {
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(EncodeError::InvalidScale(scale));
        }
        if !(0.0..=1.0).contains(&quality) {
            return Err(EncodeError::InvalidQuality(quality));
        }
        Ok(Self {
            scale,
            jpeg_quality: ((quality * 100.0).round() as u8).clamp(1, 100),
        })
    }

    pub fn encode(&self, frame: &VideoFrame) -> Result<EncodedSnapshot, EncodeError> {
        let width = scaled(frame.width(), self.scale);
        let height = scaled(frame.height(), self.scale);

        let resized;
        let pixels = if width == frame.width() && height == frame.height() {
            &frame.pixels
        } else {
            resized = imageops::resize(&frame.pixels, width, height, FilterType::Triangle);
            &resized
        };

        let mut jpeg = Vec::new();
        pixels.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality))?;

        let snapshot = EncodedSnapshot::new(jpeg, JPEG_MIME);
        debug!(
            src_width = frame.width(),
            src_height = frame.height(),
            width,
            height,
            quality = self.jpeg_quality,
            size_kb = format!("{:.1}", snapshot.approximate_size_kb()),
            "encoded snapshot"
        );
        Ok(snapshot)
    }
}

fn scaled(dim: u32, scale: f32) -> u32 {
    ((dim as f32 * scale).round() as u32).max(1)
}
