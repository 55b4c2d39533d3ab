//! Analysis pipeline.
//!
//! fetch → detect → prompt → infer → validate → fuse → store.
//!
//! The pipeline owns no I/O of its own; every collaborator is injected so
//! tests can substitute stubs. Collaborator failures abort the analysis of
//! one image. Data-quality problems in the model reply never do.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::RngCore;
use serde::Serialize;

use crate::config::AnalyzerConfig;
use crate::detect::{detector_from_settings, DetectedObject, ObjectDetector};
use crate::equipment::AnalysisResult;
use crate::error::{Collaborator, CollaboratorError, PipelineError};
use crate::fuse::{fuse, FusionWarning};
use crate::ingest::{image_source_from_url, ImageSource, SourceImage};
use crate::model::{model_from_settings, VisionModel};
use crate::prompt::build_prompt;
use crate::storage::{ResultStore, SqliteResultStore, StoredAnalysis};
use crate::validate::{validate_reply, ValidationWarning};

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    pub freeform_confidence: f64,
    pub retention: Duration,
}

/// Outcome of analysing one reply against one set of detections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplyAnalysis {
    pub result: AnalysisResult,
    pub validation_warnings: Vec<ValidationWarning>,
    pub fusion_warnings: Vec<FusionWarning>,
}

/// Key prefix for images received through the upload route.
pub const UPLOAD_PREFIX: &str = "uploads/";

/// What the caller learns about a completed analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub image_key: String,
    pub detections: usize,
    pub equipment_count: usize,
    pub dropped: usize,
    pub result: AnalysisResult,
}

pub struct Pipeline {
    images: Arc<dyn ImageSource>,
    detector: Arc<dyn ObjectDetector>,
    model: Arc<dyn VisionModel>,
    store: Arc<dyn ResultStore>,
    settings: PipelineSettings,
}

impl ReplyAnalysis {
    /// Elements discarded by validation or fusion. A reply with no usable
    /// collection drops nothing.
    pub fn dropped(&self) -> usize {
        self.validation_warnings
            .iter()
            .filter(|warning| warning.drops_element())
            .count()
            + self.fusion_warnings.len()
    }
}

/// Validate a model reply and fuse it with the detections it was prompted
/// with. Pure.
pub fn analyze_reply(
    objects: &[DetectedObject],
    reply: &str,
    freeform_confidence: f64,
) -> ReplyAnalysis {
    let validation = validate_reply(reply);
    let fusion = fuse(objects, &validation.candidates, freeform_confidence);
    ReplyAnalysis {
        result: fusion.result,
        validation_warnings: validation.warnings,
        fusion_warnings: fusion.warnings,
    }
}

impl Pipeline {
    pub fn new(
        images: Arc<dyn ImageSource>,
        detector: Arc<dyn ObjectDetector>,
        model: Arc<dyn VisionModel>,
        store: Arc<dyn ResultStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            images,
            detector,
            model,
            store,
            settings,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(cfg: &AnalyzerConfig) -> Result<Self> {
        let images = image_source_from_url(&cfg.images.url, cfg.images.timeout)?;
        let detector = detector_from_settings(&cfg.detector)?;
        let model = model_from_settings(&cfg.model)?;
        let store: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::open(&cfg.db_path)?);
        log::info!(
            "pipeline ready: images={} detector={} model={} db={}",
            images.name(),
            detector.name(),
            model.name(),
            cfg.db_path
        );
        Ok(Self::new(
            images,
            detector,
            model,
            store,
            PipelineSettings {
                freeform_confidence: cfg.freeform_confidence,
                retention: cfg.retention,
            },
        ))
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Store an uploaded image under a fresh key and return the key.
    pub fn upload(&self, mut image: SourceImage) -> Result<String, PipelineError> {
        image.key = upload_key(image.extension())?;
        self.images.store(&image).map_err(log_failure)?;
        log::info!(
            "stored upload {} ({} bytes, {})",
            image.key,
            image.bytes.len(),
            image.media_type
        );
        Ok(image.key)
    }

    /// Analyse the image stored under `image_key` and persist the result.
    pub fn analyze(&self, image_key: &str) -> Result<AnalysisSummary, PipelineError> {
        log::info!("analysing {}", image_key);
        let image = self.images.fetch(image_key).map_err(log_failure)?;
        let objects = self.detector.detect(&image).map_err(log_failure)?;
        log::info!(
            "{}: detector '{}' found {} objects",
            image_key,
            self.detector.name(),
            objects.len()
        );

        let prompt = build_prompt(&objects);
        let reply = self.model.infer(&image, &prompt).map_err(log_failure)?;
        let analysis = analyze_reply(&objects, &reply, self.settings.freeform_confidence);
        let dropped = analysis.dropped();

        let created_at = crate::now_s()?;
        let stored = StoredAnalysis::completed(
            image_key,
            analysis.result,
            image.sha256_hex(),
            created_at,
            self.settings.retention,
        );
        self.store.put(&stored).map_err(|e| {
            log_failure(CollaboratorError::unexpected(
                Collaborator::Storage,
                e.to_string(),
            ))
        })?;

        let counts = stored
            .result
            .tier_counts()
            .iter()
            .map(|(level, count)| format!("{}={}", level, count))
            .collect::<Vec<_>>()
            .join(" ");
        log::info!(
            "{}: stored {} records ({}), dropped {}",
            image_key,
            stored.result.len(),
            counts,
            dropped
        );

        Ok(AnalysisSummary {
            image_key: image_key.to_string(),
            detections: objects.len(),
            equipment_count: stored.result.len(),
            dropped,
            result: stored.result,
        })
    }
}

fn upload_key(extension: &str) -> Result<String> {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    Ok(format!(
        "{}{}-{}.{}",
        UPLOAD_PREFIX,
        millis,
        hex::encode(nonce),
        extension
    ))
}

fn log_failure(err: CollaboratorError) -> CollaboratorError {
    log::error!("{}", err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::{BoundingBox, Provenance, RiskLevel};

    #[test]
    fn upload_keys_are_unique_and_prefixed() {
        let a = upload_key("png").unwrap();
        let b = upload_key("png").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(UPLOAD_PREFIX));
        assert!(a.ends_with(".png"));
    }

    #[test]
    fn analyze_reply_tolerates_garbage() {
        let analysis = analyze_reply(&[], "not json at all", 50.0);
        assert!(analysis.result.is_empty());
        assert_eq!(analysis.validation_warnings.len(), 1);
        assert!(analysis.fusion_warnings.is_empty());
        assert_eq!(analysis.dropped(), 0);

        let prose = analyze_reply(&[], "申し訳ありませんが、画像を確認できません。", 50.0);
        assert_eq!(prose.dropped(), 0);
    }

    #[test]
    fn analyze_reply_fuses_indexed_and_freeform() {
        let objects = vec![DetectedObject::new(
            "Electronics",
            92.0,
            BoundingBox::new(10.0, 10.0, 30.0, 40.0),
        )];
        let reply = r#"```json
{"equipment": [
  {"source": "detector", "object_index": 0, "name": "ビデオスイッチャー", "risk_level": "DANGER", "description": "本番系"},
  {"source": "detector", "object_index": 4, "name": "幻の機器", "risk_level": "SAFE", "description": "存在しない"},
  {"source": "model", "name": "不明なケーブル", "bbox": {"x": 0, "y": 50, "width": 20, "height": 5}, "risk_level": "WARNING", "description": "確認してください"}
]}
```"#;
        let analysis = analyze_reply(&objects, reply, 50.0);
        assert_eq!(analysis.result.len(), 2);
        assert_eq!(analysis.fusion_warnings.len(), 1);
        assert_eq!(analysis.result.equipment[0].provenance, Provenance::Detector);
        assert_eq!(analysis.result.equipment[0].confidence, 92.0);
        assert_eq!(analysis.result.equipment[1].risk_level, RiskLevel::Warning);
        assert_eq!(analysis.result.equipment[1].confidence, 50.0);
        assert_eq!(analysis.dropped(), 1);
    }
}
