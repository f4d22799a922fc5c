//! Spatial masks suppressing detections in uninteresting regions.
//!
//! A mask marks every pixel as either watched or ignored. A detection is
//! suppressed only when the band of rows just above its bottom edge, restricted
//! to its horizontal span, lies entirely in ignored territory. The band is
//! `trigger_depth` rows tall; without a trigger depth the band is the whole box.

use std::path::Path;

use image::GrayImage;

use crate::detect::result::Rectangle;
use crate::error::{PipelineError, PipelineResult};

/// Luma at or above this value marks a watched pixel.
const WATCHED_LUMA: u8 = 128;

#[derive(Clone, Debug)]
pub struct Mask {
    width: u32,
    height: u32,
    ignored: Vec<bool>,
    trigger_depth: Option<u32>,
}

impl Mask {
    /// Build a mask from a grayscale image: bright pixels are watched, dark
    /// pixels are ignored.
    pub fn from_luma(image: &GrayImage, trigger_depth: Option<u32>) -> Self {
        let ignored = image.pixels().map(|p| p.0[0] < WATCHED_LUMA).collect();
        Self {
            width: image.width(),
            height: image.height(),
            ignored,
            trigger_depth,
        }
    }

    /// Build a mask from an explicit row-major grid of ignored flags.
    pub fn from_grid(
        width: u32,
        height: u32,
        ignored: Vec<bool>,
        trigger_depth: Option<u32>,
    ) -> PipelineResult<Self> {
        check_trigger_depth(trigger_depth)?;
        let expected = width as usize * height as usize;
        if ignored.len() != expected {
            return Err(PipelineError::config(format!(
                "mask grid has {} cells, expected {}x{}={}",
                ignored.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            ignored,
            trigger_depth,
        })
    }

    /// Load a mask image from disk.
    pub fn load(path: &Path, trigger_depth: Option<u32>) -> PipelineResult<Self> {
        check_trigger_depth(trigger_depth)?;
        let image = image::open(path).map_err(|e| {
            PipelineError::config(format!("failed to load mask {}: {}", path.display(), e))
        })?;
        let mask = Self::from_luma(&image.to_luma8(), trigger_depth);
        if mask.width == 0 || mask.height == 0 {
            return Err(PipelineError::config(format!(
                "mask {} is empty",
                path.display()
            )));
        }
        Ok(mask)
    }

    /// Fail when the mask does not cover frames of the given size.
    pub fn check_dimensions(&self, width: u32, height: u32) -> PipelineResult<()> {
        if self.width != width || self.height != height {
            return Err(PipelineError::config(format!(
                "mask is {}x{} but frames are {}x{}",
                self.width, self.height, width, height
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn trigger_depth(&self) -> Option<u32> {
        self.trigger_depth
    }

    /// Pixels outside the grid count as watched.
    pub fn is_ignored(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.ignored[y as usize * self.width as usize + x as usize]
    }

    /// True when the box's trigger band contains no watched pixel.
    pub fn masks(&self, bbox: &Rectangle) -> bool {
        let band_top = match self.trigger_depth {
            Some(depth) => bbox.end_y.saturating_sub(depth).max(bbox.start_y),
            None => bbox.start_y,
        };
        for y in band_top..bbox.end_y {
            for x in bbox.start_x..bbox.end_x {
                if !self.is_ignored(x, y) {
                    return false;
                }
            }
        }
        true
    }
}

/// A zero-row band would be vacuously ignored and mask every box.
pub fn check_trigger_depth(trigger_depth: Option<u32>) -> PipelineResult<()> {
    if trigger_depth == Some(0) {
        return Err(PipelineError::config("trigger_depth must be at least 1"));
    }
    Ok(())
}

/// A source without a mask never masks anything.
pub fn is_masked(mask: Option<&Mask>, bbox: &Rectangle) -> bool {
    mask.is_some_and(|mask| mask.masks(bbox))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// 10x10 mask whose bottom half (rows 5..) is watched.
    fn bottom_half_mask(trigger_depth: Option<u32>) -> Mask {
        let image = GrayImage::from_fn(10, 10, |_, y| if y >= 5 { Luma([255]) } else { Luma([0]) });
        Mask::from_luma(&image, trigger_depth)
    }

    #[test]
    fn whole_box_mode() {
        let mask = bottom_half_mask(None);
        assert!(!mask.masks(&Rectangle::new(4, 1, 9, 9)));
        assert!(mask.masks(&Rectangle::new(4, 1, 9, 5)));
    }

    #[test]
    fn trigger_band_only_checks_bottom_rows() {
        let mask = bottom_half_mask(Some(2));
        // Bottom rows 7 and 8 are watched.
        assert!(!mask.masks(&Rectangle::new(4, 1, 9, 9)));
        // Bottom rows 3 and 4 are ignored even though the box is tall.
        assert!(mask.masks(&Rectangle::new(4, 0, 9, 5)));
        // Rows 4 and 5: one watched row is enough.
        assert!(!mask.masks(&Rectangle::new(4, 0, 9, 6)));
    }

    #[test]
    fn single_watched_pixel_makes_box_visible() {
        let mut ignored = vec![true; 100];
        ignored[8 * 10 + 6] = false;
        let mask = Mask::from_grid(10, 10, ignored, Some(3)).unwrap();
        assert!(!mask.masks(&Rectangle::new(2, 2, 9, 9)));
        assert!(mask.masks(&Rectangle::new(0, 2, 5, 9)));
    }

    #[test]
    fn no_mask_never_masks() {
        assert!(!is_masked(None, &Rectangle::new(0, 0, 100, 100)));
    }

    #[test]
    fn regions_outside_the_grid_are_watched() {
        let mask = Mask::from_grid(4, 4, vec![true; 16], None).unwrap();
        assert!(mask.masks(&Rectangle::new(0, 0, 4, 4)));
        assert!(!mask.masks(&Rectangle::new(2, 2, 6, 6)));
    }

    #[test]
    fn grid_size_mismatch_is_a_configuration_error() {
        let err = Mask::from_grid(4, 4, vec![true; 15], None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_trigger_depth_is_rejected() {
        let err = Mask::from_grid(10, 10, vec![false; 100], Some(0)).unwrap_err();
        assert!(err.is_fatal());
        assert!(Mask::from_grid(10, 10, vec![false; 100], Some(1)).is_ok());
    }

    #[test]
    fn dimension_check() {
        let mask = bottom_half_mask(None);
        assert!(mask.check_dimensions(10, 10).is_ok());
        assert!(mask.check_dimensions(640, 480).is_err());
    }

    #[test]
    fn load_from_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let image = GrayImage::from_fn(8, 6, |x, _| if x < 4 { Luma([0]) } else { Luma([255]) });
        image.save(&path).unwrap();

        let mask = Mask::load(&path, Some(1)).unwrap();
        assert_eq!((mask.width(), mask.height()), (8, 6));
        assert!(mask.masks(&Rectangle::new(0, 0, 4, 6)));
        assert!(!mask.masks(&Rectangle::new(2, 0, 6, 6)));
    }
}
