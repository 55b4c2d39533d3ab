//! Vision model reply validation.
//!
//! Lenient at the collection level: a bad element is dropped, never the
//! whole reply. Strict at the safety level: an unrecognised risk token
//! becomes `UNKNOWN`, never `SAFE`.
//!
//! Structural failure of the reply as a whole degrades to zero candidates.
//! Nothing in this module returns an error.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::equipment::{
    is_percentage, BoundingBox, CandidateEquipment, RiskLevel, MAX_DESCRIPTION_CHARS,
};
use crate::prompt::{SOURCE_DETECTOR, SOURCE_MODEL};

/// Top-level collection field.
pub const EQUIPMENT_FIELD: &str = "equipment";

const TRUNCATION_MARKER: &str = "...";
const GEOMETRY_FIELDS: [(&str, &str); 4] = [
    ("x", "bbox.x"),
    ("y", "bbox.y"),
    ("width", "bbox.width"),
    ("height", "bbox.height"),
];

/// Structured payload located inside a model reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Inside a ```json fence.
    Labeled(&'a str),
    /// Inside a fence with no (or another) language tag.
    Unlabeled(&'a str),
    /// No fence; the reply itself.
    Bare(&'a str),
}

impl<'a> Payload<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Payload::Labeled(text) | Payload::Unlabeled(text) | Payload::Bare(text) => text.trim(),
        }
    }
}

/// Locate the structured payload in a reply.
///
/// A missing closing fence runs to the end of the reply.
pub fn extract_payload(reply: &str) -> Payload<'_> {
    static LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static UNLABELED_RE: OnceLock<Regex> = OnceLock::new();
    let labeled = LABELED_RE
        .get_or_init(|| Regex::new(r"(?s)```(?i:json)[ \t]*\r?\n?(.*?)(?:```|\z)").unwrap());
    let unlabeled = UNLABELED_RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)(?:```|\z)").unwrap()
    });

    if let Some(inner) = labeled.captures(reply).and_then(|caps| caps.get(1)) {
        return Payload::Labeled(inner.as_str());
    }
    if let Some(inner) = unlabeled.captures(reply).and_then(|caps| caps.get(1)) {
        return Payload::Unlabeled(inner.as_str());
    }
    Payload::Bare(reply)
}

/// Why part of a reply was dropped or altered.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationWarning {
    Undecodable { error: String },
    MissingCollection,
    ElementNotAnObject { index: usize },
    UnknownSource { index: usize, source: String },
    MissingField { index: usize, field: &'static str },
    InvalidField { index: usize, field: &'static str },
    InvalidObjectIndex { index: usize },
    GeometryOutOfRange { index: usize, field: &'static str },
    RiskCoerced { index: usize, value: String },
    DescriptionTruncated { index: usize, chars: usize },
}

impl ValidationWarning {
    /// True when one element of the collection was discarded. Warnings
    /// about the reply as a whole and repairs of kept elements are false.
    pub fn drops_element(&self) -> bool {
        matches!(
            self,
            ValidationWarning::ElementNotAnObject { .. }
                | ValidationWarning::UnknownSource { .. }
                | ValidationWarning::MissingField { .. }
                | ValidationWarning::InvalidField { .. }
                | ValidationWarning::InvalidObjectIndex { .. }
                | ValidationWarning::GeometryOutOfRange { .. }
        )
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::Undecodable { error } => write!(f, "reply is not JSON: {}", error),
            ValidationWarning::MissingCollection => {
                write!(f, "reply has no '{}' array", EQUIPMENT_FIELD)
            }
            ValidationWarning::ElementNotAnObject { index } => {
                write!(f, "element {} is not an object", index)
            }
            ValidationWarning::UnknownSource { index, source } => {
                write!(f, "element {} has unknown source {}", index, source)
            }
            ValidationWarning::MissingField { index, field } => {
                write!(f, "element {} is missing '{}'", index, field)
            }
            ValidationWarning::InvalidField { index, field } => {
                write!(f, "element {} has an invalid '{}'", index, field)
            }
            ValidationWarning::InvalidObjectIndex { index } => {
                write!(f, "element {} has a non-integer or negative object_index", index)
            }
            ValidationWarning::GeometryOutOfRange { index, field } => {
                write!(f, "element {} has '{}' outside 0-100", index, field)
            }
            ValidationWarning::RiskCoerced { index, value } => {
                write!(f, "element {} risk level {} coerced to UNKNOWN", index, value)
            }
            ValidationWarning::DescriptionTruncated { index, chars } => write!(
                f,
                "element {} description truncated from {} characters",
                index, chars
            ),
        }
    }
}

/// Candidates that survived validation, plus what happened to the rest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Validation {
    pub candidates: Vec<CandidateEquipment>,
    pub warnings: Vec<ValidationWarning>,
}

impl Validation {
    fn rejected(warning: ValidationWarning) -> Self {
        Self {
            candidates: Vec::new(),
            warnings: vec![warning],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Variant {
    Indexed,
    Freeform,
}

/// Parse and sanitize a raw model reply.
pub fn validate_reply(reply: &str) -> Validation {
    let payload = extract_payload(reply);
    let document: Value = match serde_json::from_str(payload.text()) {
        Ok(value) => value,
        Err(err) => {
            log::error!("model reply is not JSON: {}", err);
            log::debug!("undecodable model reply: {}", reply);
            return Validation::rejected(ValidationWarning::Undecodable {
                error: err.to_string(),
            });
        }
    };

    let Some(elements) = document.get(EQUIPMENT_FIELD).and_then(Value::as_array) else {
        log::warn!("model reply has no '{}' array", EQUIPMENT_FIELD);
        return Validation::rejected(ValidationWarning::MissingCollection);
    };

    let mut out = Validation::default();
    for (index, element) in elements.iter().enumerate() {
        match validate_element(index, element, &mut out.warnings) {
            Ok(candidate) => out.candidates.push(candidate),
            Err(warning) => out.warnings.push(warning),
        }
    }
    for warning in &out.warnings {
        log::warn!("model reply: {}", warning);
    }
    out
}

fn validate_element(
    index: usize,
    element: &Value,
    warnings: &mut Vec<ValidationWarning>,
) -> Result<CandidateEquipment, ValidationWarning> {
    let obj = element
        .as_object()
        .ok_or(ValidationWarning::ElementNotAnObject { index })?;

    let variant = match obj.get("source") {
        None | Some(Value::Null) => Variant::Indexed,
        Some(Value::String(source)) => match source.as_str() {
            SOURCE_DETECTOR | "rekognition" => Variant::Indexed,
            SOURCE_MODEL | "bedrock" => Variant::Freeform,
            _ => {
                return Err(ValidationWarning::UnknownSource {
                    index,
                    source: format!("{:?}", source),
                })
            }
        },
        Some(other) => {
            return Err(ValidationWarning::UnknownSource {
                index,
                source: other.to_string(),
            })
        }
    };

    let name = required_string(obj, index, "name")?;
    let risk_value = obj
        .get("risk_level")
        .ok_or(ValidationWarning::MissingField {
            index,
            field: "risk_level",
        })?;
    let description = required_string(obj, index, "description")?;

    let candidate = match variant {
        Variant::Indexed => {
            let raw = obj.get("object_index").ok_or(ValidationWarning::MissingField {
                index,
                field: "object_index",
            })?;
            let object_index = raw
                .as_u64()
                .and_then(|value| usize::try_from(value).ok())
                .ok_or(ValidationWarning::InvalidObjectIndex { index })?;
            CandidateEquipment::Indexed {
                object_index,
                name,
                risk_level: normalize_risk(index, risk_value, warnings),
                description: clamp_description(index, description, warnings),
            }
        }
        Variant::Freeform => {
            let bbox = bounding_box(obj, index)?;
            CandidateEquipment::Freeform {
                name,
                bbox,
                risk_level: normalize_risk(index, risk_value, warnings),
                description: clamp_description(index, description, warnings),
            }
        }
    };
    Ok(candidate)
}

fn required_string(
    obj: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<String, ValidationWarning> {
    match obj.get(field) {
        None => Err(ValidationWarning::MissingField { index, field }),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ValidationWarning::InvalidField { index, field }),
    }
}

fn bounding_box(obj: &Map<String, Value>, index: usize) -> Result<BoundingBox, ValidationWarning> {
    let bbox = match obj.get("bbox") {
        None => return Err(ValidationWarning::MissingField { index, field: "bbox" }),
        Some(Value::Object(bbox)) => bbox,
        Some(_) => return Err(ValidationWarning::InvalidField { index, field: "bbox" }),
    };

    let mut values = [0.0f64; 4];
    for (slot, (key, field)) in values.iter_mut().zip(GEOMETRY_FIELDS) {
        let value = bbox
            .get(key)
            .ok_or(ValidationWarning::MissingField { index, field })?
            .as_f64()
            .ok_or(ValidationWarning::InvalidField { index, field })?;
        if !is_percentage(value) {
            return Err(ValidationWarning::GeometryOutOfRange { index, field });
        }
        *slot = value;
    }
    let [x, y, width, height] = values;
    Ok(BoundingBox::new(x, y, width, height))
}

fn normalize_risk(index: usize, value: &Value, warnings: &mut Vec<ValidationWarning>) -> RiskLevel {
    if let Some(level) = value.as_str().and_then(RiskLevel::from_canonical) {
        return level;
    }
    warnings.push(ValidationWarning::RiskCoerced {
        index,
        value: value.to_string(),
    });
    RiskLevel::Unknown
}

fn clamp_description(
    index: usize,
    description: String,
    warnings: &mut Vec<ValidationWarning>,
) -> String {
    let chars = description.chars().count();
    if chars <= MAX_DESCRIPTION_CHARS {
        return description;
    }
    warnings.push(ValidationWarning::DescriptionTruncated { index, chars });
    let keep = MAX_DESCRIPTION_CHARS - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = description.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
