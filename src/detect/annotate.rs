//! In-place frame annotation: bounding boxes plus a text label per detection.
//!
//! Boxes and label plates are drawn with `imageproc`; label text is rendered
//! from an embedded DejaVu Sans face through `ab_glyph`. `imageproc` clips all
//! drawing to the image bounds.

use std::sync::OnceLock;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::result::{Detection, Rectangle};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);
const LINE_WEIGHT: u32 = 2;
const LABEL_PX: u32 = 14;
const LABEL_PADDING: u32 = 3;

static LABEL_FONT_BYTES: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

#[derive(Clone, Copy, Debug)]
pub struct AnnotationStyle {
    /// Append the box area to the label.
    pub show_area: bool,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self { show_area: true }
    }
}

/// Label text, e.g. `"Person: 87% (9025)"`.
pub fn label_text(detection: &Detection, style: AnnotationStyle) -> String {
    let pct = (detection.confidence * 100.0).floor().max(0.0) as u32;
    let name = capitalize(&detection.label);
    if style.show_area {
        format!("{}: {}% ({})", name, pct, detection.bbox.area())
    } else {
        format!("{}: {}%", name, pct)
    }
}

/// Parsed once; `None` if the embedded face fails to load, in which case
/// labels are drawn as blank plates.
fn label_font() -> Option<&'static FontArc> {
    static FONT: OnceLock<Option<FontArc>> = OnceLock::new();
    FONT.get_or_init(|| match FontArc::try_from_slice(LABEL_FONT_BYTES) {
        Ok(font) => Some(font),
        Err(e) => {
            log::error!("failed to load label font: {}", e);
            None
        }
    })
    .as_ref()
}

/// Draw the detection's box and label onto the image.
pub fn annotate(image: &mut RgbImage, detection: &Detection, style: AnnotationStyle) {
    draw_box(image, &detection.bbox);

    let text = label_text(detection, style);
    let scale = PxScale::from(LABEL_PX as f32);
    let font = label_font();
    let text_width = match font {
        Some(font) => text_size(scale, font, &text).0,
        None => 0,
    };
    let label_height = LABEL_PX + 2 * LABEL_PADDING;
    let label_width = text_width + 2 * LABEL_PADDING;

    // Above the box when there is room, otherwise tucked inside its top edge.
    let label_top = if detection.bbox.start_y >= label_height {
        detection.bbox.start_y - label_height
    } else {
        detection.bbox.start_y
    };
    let left = detection.bbox.start_x;

    draw_filled_rect_mut(
        image,
        Rect::at(left as i32, label_top as i32).of_size(label_width, label_height),
        LABEL_BACKGROUND,
    );
    if let Some(font) = font {
        draw_text_mut(
            image,
            LABEL_TEXT,
            (left + LABEL_PADDING) as i32,
            (label_top + LABEL_PADDING) as i32,
            scale,
            font,
            &text,
        );
    }
}

/// Outline `[start, end)` with a `LINE_WEIGHT` pixel stroke drawn inward.
fn draw_box(image: &mut RgbImage, bbox: &Rectangle) {
    let width = bbox.end_x.saturating_sub(bbox.start_x);
    let height = bbox.end_y.saturating_sub(bbox.start_y);
    for inset in 0..LINE_WEIGHT {
        let (w, h) = (
            width.saturating_sub(2 * inset),
            height.saturating_sub(2 * inset),
        );
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((bbox.start_x + inset) as i32, (bbox.start_y + inset) as i32)
            .of_size(w, h);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
