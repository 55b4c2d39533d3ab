//! Equipment data model.
//!
//! Two kinds of claim come back from the vision-language model:
//! - indexed candidates, which borrow geometry from a detector result, and
//! - freeform candidates, which carry their own geometry.
//!
//! Both resolve into `EquipmentRecord`, the unit of the persisted inventory.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 100;

/// True for a finite value within [0, 100]. Shared by geometry and
/// confidence checks.
pub fn is_percentage(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Bounding box in percentage coordinates (0..=100), origin top-left.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when every component lies within [0, 100].
    pub fn is_in_range(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| is_percentage(*v))
    }
}

/// Safety tier.
///
/// `Unknown` and `Warning` are where ambiguity lands; nothing ever defaults
/// to `Safe`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Safe,
    Warning,
    Danger,
    Unknown,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Safe,
        RiskLevel::Warning,
        RiskLevel::Danger,
        RiskLevel::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Danger => "DANGER",
            RiskLevel::Unknown => "UNKNOWN",
        }
    }

    /// Exact match against the canonical tokens.
    pub fn from_canonical(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == token)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source supplied geometry and confidence for a record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Geometry and confidence from the object detector.
    Detector,
    /// Geometry asserted by the vision-language model.
    Model,
}

/// Validated model claim, before fusion.
#[derive(Clone, Debug, PartialEq)]
pub enum CandidateEquipment {
    Indexed {
        object_index: usize,
        name: String,
        risk_level: RiskLevel,
        description: String,
    },
    Freeform {
        name: String,
        bbox: BoundingBox,
        risk_level: RiskLevel,
        description: String,
    },
}

impl CandidateEquipment {
    pub fn name(&self) -> &str {
        match self {
            CandidateEquipment::Indexed { name, .. } | CandidateEquipment::Freeform { name, .. } => {
                name
            }
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            CandidateEquipment::Indexed { risk_level, .. }
            | CandidateEquipment::Freeform { risk_level, .. } => *risk_level,
        }
    }
}

/// Final fused equipment record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EquipmentRecord {
    pub name: String,
    pub bbox: BoundingBox,
    pub risk_level: RiskLevel,
    pub description: String,
    /// 0..=100
    pub confidence: f64,
    pub provenance: Provenance,
}

/// Ordered equipment inventory for one image.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub equipment: Vec<EquipmentRecord>,
}

impl AnalysisResult {
    pub fn len(&self) -> usize {
        self.equipment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
    }

    /// Number of records per tier, in canonical tier order.
    pub fn tier_counts(&self) -> [(RiskLevel, usize); 4] {
        RiskLevel::ALL.map(|level| {
            let count = self
                .equipment
                .iter()
                .filter(|record| record.risk_level == level)
                .count();
            (level, count)
        })
    }
}
