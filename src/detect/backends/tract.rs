#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::backends::ssd::{load_labels, relative_box};
use crate::detect::result::Detection;

/// Tract-based SSD detector for ONNX models.
///
/// Expects a u8 NHWC input of `input_width` x `input_height` and three outputs:
/// boxes `[1, N, 4]` as normalized `[ymin, xmin, ymax, xmax]`, class indices
/// `[1, N]` and scores `[1, N]`. Frames larger than the model input are resized
/// before inference; boxes are mapped back onto the original frame.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
    min_score: f32,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels = load_labels(labels_path.as_ref())?;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, input_height as usize, input_width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            input_width,
            input_height,
            min_score: 0.1,
        })
    }

    /// Drop raw model outputs scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let frame = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
            anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                width as usize * height as usize * 3,
                width,
                height,
                pixels.len()
            )
        })?;
        let resized = if width != self.input_width || height != self.input_height {
            image::imageops::resize(
                &frame,
                self.input_width,
                self.input_height,
                FilterType::Triangle,
            )
        } else {
            frame
        };

        let input = tract_ndarray::Array4::from_shape_vec(
            (1, self.input_height as usize, self.input_width as usize, 3),
            resized.into_raw(),
        )
        .context("model input shape mismatch")?;
        Ok(input.into_tensor())
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 3 {
            return Err(anyhow!(
                "expected boxes, classes and scores outputs, got {}",
                outputs.len()
            ));
        }

        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes output was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output was not f32")?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let mut detections = Vec::new();
        for (i, (&score, &class)) in scores.iter().zip(classes.iter()).enumerate() {
            if score < self.min_score {
                continue;
            }
            let Some(label) = self.labels.get(class as usize) else {
                continue;
            };
            let Some(coords) = boxes.get(i * 4..i * 4 + 4) else {
                break;
            };
            let bbox = relative_box([coords[0], coords[1], coords[2], coords[3]], width, height);
            detections.push(Detection::new(label.clone(), score, bbox));
        }
        Ok(detections)
    }
}
