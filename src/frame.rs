//! Frames flowing through the pipeline.
//!
//! A `Frame` is owned by exactly one stage at a time: the reader that decoded
//! it, the queue, then the dispatcher. The dispatcher annotates it in place and
//! then freezes it behind an `Arc` before handing it to the debouncer.

use image::RgbImage;
use std::time::{Instant, SystemTime};

pub struct Frame {
    pub source_id: String,
    /// RGB pixels, height x width x 3.
    pub image: RgbImage,
    /// Monotonic capture instant.
    pub captured_at: Instant,
    /// Wall-clock capture time, used for snapshot naming.
    pub captured_wall: SystemTime,
}

impl Frame {
    pub fn new(source_id: impl Into<String>, image: RgbImage) -> Self {
        Self {
            source_id: source_id.into(),
            image,
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGB bytes for the detector.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("source_id", &self.source_id)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_exposes_dimensions_and_pixels() {
        let frame = Frame::new("front", RgbImage::new(4, 2));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixels().len(), 4 * 2 * 3);
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::new("front", RgbImage::new(2, 2));
        let debug = format!("{:?}", frame);
        assert!(debug.contains("front"));
        assert!(!debug.contains("image"));
    }
}
