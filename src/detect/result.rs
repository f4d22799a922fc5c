/// Axis-aligned box in pixel coordinates. `end_x >= start_x`, `end_y >= start_y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rectangle {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl Rectangle {
    /// Build a rectangle, swapping corners that arrive out of order.
    pub fn new(start_x: u32, start_y: u32, end_x: u32, end_y: u32) -> Self {
        Self {
            start_x: start_x.min(end_x),
            start_y: start_y.min(end_y),
            end_x: start_x.max(end_x),
            end_y: start_y.max(end_y),
        }
    }

    pub fn width(&self) -> u32 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// A single object reported by the detector.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: Rectangle,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: Rectangle) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}
