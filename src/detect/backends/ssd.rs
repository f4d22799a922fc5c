//! Helpers for SSD-style detectors (MobileNet SSD and friends).

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::result::Rectangle;

/// Load a label map, one label per line. A leading `???` placeholder line, as
/// shipped with many TF Lite label maps, is dropped.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label map {}", path.display()))?;
    parse_labels(&raw)
}

pub fn parse_labels(raw: &str) -> Result<Vec<String>> {
    let mut labels: Vec<String> = raw.lines().map(|line| line.trim().to_string()).collect();
    if labels.first().is_some_and(|first| first == "???") {
        labels.remove(0);
    }
    while labels.last().is_some_and(|last| last.is_empty()) {
        labels.pop();
    }
    if labels.is_empty() {
        return Err(anyhow!("label map is empty"));
    }
    Ok(labels)
}

/// Convert a normalized `[ymin, xmin, ymax, xmax]` box to pixel coordinates on
/// a `width` x `height` frame. Starts are clamped to at least 1 and ends to the
/// frame dimensions.
pub fn relative_box(bbox: [f32; 4], width: u32, height: u32) -> Rectangle {
    let w = width as f32;
    let h = height as f32;
    let start_y = (bbox[0] * h).max(1.0) as u32;
    let start_x = (bbox[1] * w).max(1.0) as u32;
    let end_y = (bbox[2] * h).min(h).max(0.0) as u32;
    let end_x = (bbox[3] * w).min(w).max(0.0) as u32;
    Rectangle::new(start_x, start_y, end_x, end_y)
}
