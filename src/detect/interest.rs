//! Per-source acceptance rules for detections.

use std::collections::HashMap;

use crate::detect::result::Detection;

/// Acceptance criteria for one label on one source.
///
/// Area bounds are inclusive-lower, exclusive-upper.
#[derive(Clone, Debug, PartialEq)]
pub struct InterestRule {
    pub label: String,
    pub min_confidence: f32,
    pub min_area: u64,
    pub max_area: u64,
}

impl InterestRule {
    /// Rule with unrestricted area.
    pub fn new(label: impl Into<String>, min_confidence: f32) -> Self {
        Self {
            label: label.into(),
            min_confidence,
            min_area: 0,
            max_area: u64::MAX,
        }
    }

    pub fn with_area(mut self, min_area: u64, max_area: u64) -> Self {
        self.min_area = min_area;
        self.max_area = max_area;
        self
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        let area = detection.bbox.area();
        detection.confidence >= self.min_confidence
            && area >= self.min_area
            && area < self.max_area
    }
}

/// Interest rules keyed by label.
pub type InterestMap = HashMap<String, InterestRule>;

pub fn interest_map(rules: impl IntoIterator<Item = InterestRule>) -> InterestMap {
    rules
        .into_iter()
        .map(|rule| (rule.label.clone(), rule))
        .collect()
}

/// A detection matches iff a rule exists for its label and that rule accepts it.
pub fn matches_interest(interests: &InterestMap, detection: &Detection) -> bool {
    interests
        .get(&detection.label)
        .is_some_and(|rule| rule.accepts(detection))
}
