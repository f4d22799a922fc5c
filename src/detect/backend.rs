use anyhow::Result;

use crate::detect::result::Detection;

/// Object detector used by the dispatcher.
///
/// The dispatcher owns its detector and calls it from a single thread, so
/// implementations may keep internal state between calls. Results carry no
/// ordering guarantee.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB frame of `width` x `height` pixels.
    ///
    /// Implementations must treat the pixel slice as read-only.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> Detector for F
where
    F: FnMut(&[u8], u32, u32) -> Result<Vec<Detection>> + Send,
{
    fn name(&self) -> &'static str {
        "fn"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        self(pixels, width, height)
    }
}
