use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::Detector;
use crate::detect::result::{Detection, Rectangle};

/// Label reported by `StubDetector`.
pub const MOTION_LABEL: &str = "motion";

const MOTION_CONFIDENCE: f32 = 0.85;

/// Stub detector for dry runs and tests. Hashes each frame and reports a
/// full-frame `motion` detection whenever the hash changes.
#[derive(Default)]
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(pixels).into();
        let motion = self.last_hash.is_some_and(|prev| prev != current_hash);
        self.last_hash = Some(current_hash);

        if motion {
            Ok(vec![Detection::new(
                MOTION_LABEL,
                MOTION_CONFIDENCE,
                Rectangle::new(0, 0, width, height),
            )])
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_detector_reports_changes() {
        let mut detector = StubDetector::new();

        assert!(detector.detect(b"frame1", 10, 10).unwrap().is_empty());

        let changed = detector.detect(b"frame2", 10, 10).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].label, MOTION_LABEL);
        assert_eq!(changed[0].confidence, 0.85);
        assert_eq!(changed[0].bbox.area(), 100);

        assert!(detector.detect(b"frame2", 10, 10).unwrap().is_empty());
    }
}
