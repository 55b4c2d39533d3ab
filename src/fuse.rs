//! Detector/model result fusion.
//!
//! Geometry and confidence come from the detector whenever a claim names a
//! detected object; semantics (name, tier, description) always come from
//! the model. A claim naming an object the detector never produced is
//! dropped.

use std::fmt;

use crate::detect::DetectedObject;
use crate::equipment::{AnalysisResult, CandidateEquipment, EquipmentRecord, Provenance};

/// Confidence assigned to model-asserted geometry unless configured.
pub const DEFAULT_FREEFORM_CONFIDENCE: f64 = 50.0;

/// Candidate discarded during fusion.
#[derive(Clone, Debug, PartialEq)]
pub enum FusionWarning {
    IndexOutOfRange {
        object_index: usize,
        detections: usize,
        name: String,
    },
}

impl fmt::Display for FusionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionWarning::IndexOutOfRange {
                object_index,
                detections,
                name,
            } => write!(
                f,
                "'{}' references object {} but only {} were detected",
                name, object_index, detections
            ),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fusion {
    pub result: AnalysisResult,
    pub warnings: Vec<FusionWarning>,
}

/// Merge detector output with validated model candidates.
///
/// Candidate order is preserved. The output never has more records than
/// there were candidates.
pub fn fuse(
    objects: &[DetectedObject],
    candidates: &[CandidateEquipment],
    freeform_confidence: f64,
) -> Fusion {
    let mut fusion = Fusion::default();
    for candidate in candidates {
        match candidate {
            CandidateEquipment::Indexed {
                object_index,
                name,
                risk_level,
                description,
            } => {
                let Some(object) = objects.get(*object_index) else {
                    let warning = FusionWarning::IndexOutOfRange {
                        object_index: *object_index,
                        detections: objects.len(),
                        name: name.clone(),
                    };
                    log::warn!("dropping candidate: {}", warning);
                    fusion.warnings.push(warning);
                    continue;
                };
                fusion.result.equipment.push(EquipmentRecord {
                    name: name.clone(),
                    bbox: object.bbox,
                    risk_level: *risk_level,
                    description: description.clone(),
                    confidence: object.confidence,
                    provenance: Provenance::Detector,
                });
            }
            CandidateEquipment::Freeform {
                name,
                bbox,
                risk_level,
                description,
            } => fusion.result.equipment.push(EquipmentRecord {
                name: name.clone(),
                bbox: *bbox,
                risk_level: *risk_level,
                description: description.clone(),
                confidence: freeform_confidence,
                provenance: Provenance::Model,
            }),
        }
    }
    fusion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::{BoundingBox, RiskLevel};

    fn switcher() -> DetectedObject {
        DetectedObject::new("Electronics", 92.0, BoundingBox::new(10.0, 10.0, 30.0, 40.0))
    }

    fn indexed(object_index: usize) -> CandidateEquipment {
        CandidateEquipment::Indexed {
            object_index,
            name: "ビデオスイッチャー".to_string(),
            risk_level: RiskLevel::Danger,
            description: "本番系".to_string(),
        }
    }

    fn freeform() -> CandidateEquipment {
        CandidateEquipment::Freeform {
            name: "不明なケーブル".to_string(),
            bbox: BoundingBox::new(0.0, 50.0, 20.0, 5.0),
            risk_level: RiskLevel::Warning,
            description: "不明なケーブル。触る前に確認してください".to_string(),
        }
    }

    #[test]
    fn indexed_claims_take_detector_geometry_and_confidence() {
        let fusion = fuse(&[switcher()], &[indexed(0), freeform()], DEFAULT_FREEFORM_CONFIDENCE);
        assert!(fusion.warnings.is_empty());
        let records = &fusion.result.equipment;
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].name, "ビデオスイッチャー");
        assert_eq!(records[0].bbox, BoundingBox::new(10.0, 10.0, 30.0, 40.0));
        assert_eq!(records[0].confidence, 92.0);
        assert_eq!(records[0].risk_level, RiskLevel::Danger);
        assert_eq!(records[0].provenance, Provenance::Detector);

        assert_eq!(records[1].bbox, BoundingBox::new(0.0, 50.0, 20.0, 5.0));
        assert_eq!(records[1].confidence, 50.0);
        assert_eq!(records[1].provenance, Provenance::Model);
    }

    #[test]
    fn out_of_range_index_is_dropped_not_guessed() {
        let fusion = fuse(&[switcher()], &[indexed(3), freeform()], DEFAULT_FREEFORM_CONFIDENCE);
        assert_eq!(fusion.result.len(), 1);
        assert_eq!(fusion.result.equipment[0].provenance, Provenance::Model);
        assert_eq!(
            fusion.warnings,
            vec![FusionWarning::IndexOutOfRange {
                object_index: 3,
                detections: 1,
                name: "ビデオスイッチャー".to_string(),
            }]
        );
    }

    #[test]
    fn indexed_claims_without_detections_are_all_dropped() {
        let fusion = fuse(&[], &[indexed(0), indexed(1)], DEFAULT_FREEFORM_CONFIDENCE);
        assert!(fusion.result.is_empty());
        assert_eq!(fusion.warnings.len(), 2);
    }

    #[test]
    fn freeform_confidence_is_configurable() {
        let fusion = fuse(&[], &[freeform()], 35.0);
        assert_eq!(fusion.result.equipment[0].confidence, 35.0);
    }

    #[test]
    fn fusion_is_deterministic_and_never_grows() {
        let objects = vec![switcher(), switcher()];
        let candidates = vec![indexed(1), freeform(), indexed(7), indexed(0)];
        let first = fuse(&objects, &candidates, DEFAULT_FREEFORM_CONFIDENCE);
        let second = fuse(&objects, &candidates, DEFAULT_FREEFORM_CONFIDENCE);
        assert_eq!(first, second);
        assert!(first.result.len() <= candidates.len());
        assert_eq!(first.result.len(), 3);
    }
}
