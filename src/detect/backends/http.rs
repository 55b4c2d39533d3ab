//! HTTP label-detection backend.
//!
//! Posts the image to a label-detection service and reads back a
//! DetectLabels-shaped reply:
//! `{ "Labels": [ { "Name": .., "Instances": [ { "BoundingBox": {..}, "Confidence": .. } ] } ] }`
//!
//! Boxes arrive as 0..1 ratios and are converted to percentages. Labels
//! without instance geometry are ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::DetectedObject;
use crate::equipment::BoundingBox;
use crate::error::{Collaborator, CollaboratorError};
use crate::ingest::SourceImage;

#[derive(Clone, Debug)]
pub struct HttpDetectorConfig {
    pub url: Url,
    /// Detections below this confidence (0..=100) are dropped.
    pub min_confidence: f64,
    pub max_labels: u32,
    pub timeout: Duration,
}

pub struct HttpDetector {
    config: HttpDetectorConfig,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DetectLabelsRequest<'a> {
    image: ImagePayload<'a>,
    max_labels: u32,
    min_confidence: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ImagePayload<'a> {
    bytes: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DetectLabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Label {
    name: String,
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    bounding_box: Option<RatioBox>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RatioBox {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl RatioBox {
    fn to_percent(&self) -> BoundingBox {
        let pct = |ratio: f64| (ratio * 100.0).clamp(0.0, 100.0);
        BoundingBox::new(
            pct(self.left),
            pct(self.top),
            pct(self.width),
            pct(self.height),
        )
    }
}

impl HttpDetector {
    pub fn new(config: HttpDetectorConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }
}

/// Flatten a detection reply into geometry-bearing objects.
///
/// Order is label order, then instance order within a label.
pub(crate) fn objects_from_response(
    response: DetectLabelsResponse,
    min_confidence: f64,
) -> Vec<DetectedObject> {
    let mut out = Vec::new();
    for label in response.labels {
        for instance in label.instances {
            let Some(ratio_box) = instance.bounding_box else {
                continue;
            };
            if !instance.confidence.is_finite() || instance.confidence < min_confidence {
                continue;
            }
            out.push(DetectedObject::new(
                label.name.clone(),
                instance.confidence.clamp(0.0, 100.0),
                ratio_box.to_percent(),
            ));
        }
    }
    out
}

impl ObjectDetector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, image: &SourceImage) -> Result<Vec<DetectedObject>, CollaboratorError> {
        let encoded = image.base64();
        let request = DetectLabelsRequest {
            image: ImagePayload { bytes: &encoded },
            max_labels: self.config.max_labels,
            min_confidence: self.config.min_confidence,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| CollaboratorError::unexpected(Collaborator::Detector, e.to_string()))?;

        let response = self
            .agent
            .post(self.config.url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| CollaboratorError::from_http(Collaborator::Detector, e))?;
        let text = response
            .into_string()
            .map_err(|e| CollaboratorError::from_io(Collaborator::Detector, &e))?;
        let parsed: DetectLabelsResponse = serde_json::from_str(&text).map_err(|e| {
            CollaboratorError::unexpected(
                Collaborator::Detector,
                format!("invalid detection reply: {}", e),
            )
        })?;

        let objects = objects_from_response(parsed, self.config.min_confidence);
        log::info!(
            "detector '{}' found {} objects with geometry in {}",
            self.name(),
            objects.len(),
            image.key
        );
        Ok(objects)
    }
}
