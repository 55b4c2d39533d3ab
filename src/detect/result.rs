use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::equipment::{is_percentage, BoundingBox};

/// One object found by the external detector.
///
/// Exists for the duration of one image's analysis and is never mutated
/// after the detector returns it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectedObject {
    /// Detector label (free text, e.g. "Electronics").
    pub label: String,
    /// Confidence (0..=100).
    pub confidence: f64,
    /// Percentage-scale box.
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Reject confidence or geometry outside the percentage scale.
    pub fn check(&self) -> Result<()> {
        if !is_percentage(self.confidence) {
            return Err(anyhow!(
                "detection '{}' has confidence {} outside 0..=100",
                self.label,
                self.confidence
            ));
        }
        if !self.bbox.is_in_range() {
            return Err(anyhow!(
                "detection '{}' has a bounding box outside 0..=100: {:?}",
                self.label,
                self.bbox
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_enforces_percentage_scale() {
        let ok = DetectedObject::new("Electronics", 100.0, BoundingBox::new(0.0, 0.0, 100.0, 100.0));
        assert!(ok.check().is_ok());

        let confident = DetectedObject::new("Electronics", 150.0, BoundingBox::new(0.0, 0.0, 5.0, 5.0));
        assert!(confident.check().is_err());

        let wide = DetectedObject::new("Cable", 80.0, BoundingBox::new(90.0, 0.0, 120.0, 5.0));
        assert!(wide.check().is_err());
    }
}
