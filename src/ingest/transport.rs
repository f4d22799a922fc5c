use std::time::Duration;

use image::RgbImage;

use crate::error::PipelineResult;

/// Connect/read timeouts applied when opening a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            read: Duration::from_secs(3),
        }
    }
}

/// Source of decoded video streams.
pub trait Transport: Send {
    /// Open `address`. Failures are reported as `PipelineError::Transport`.
    fn open(&mut self, address: &str, timeouts: &Timeouts) -> PipelineResult<Box<dyn VideoStream>>;
}

/// An open, decoding video stream.
pub trait VideoStream: Send {
    /// Best guess at the stream's native frame rate.
    fn native_fps(&self) -> f64;

    /// Next decoded RGB frame. `Ok(None)` means the stream ended normally.
    fn next_frame(&mut self) -> PipelineResult<Option<RgbImage>>;

    /// Release the stream. Calling it more than once is harmless.
    fn close(&mut self);
}
