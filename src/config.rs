use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::equipment::is_percentage;
use crate::fuse::DEFAULT_FREEFORM_CONFIDENCE;

const DEFAULT_DB_PATH: &str = "analysis.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 3;
const DEFAULT_IMAGES_URL: &str = "file:///var/lib/equipment-risk/images";
const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DETECTOR_URL: &str = "none://";
const DEFAULT_MIN_CONFIDENCE: f64 = 70.0;
const DEFAULT_MAX_LABELS: u32 = 50;
const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MODEL_URL: &str = "http://127.0.0.1:8788/invoke";
const DEFAULT_MODEL_ID: &str = "anthropic.claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnalyzerConfigFile {
    db_path: Option<String>,
    freeform_confidence: Option<f64>,
    api: Option<ApiConfigFile>,
    images: Option<ImagesConfigFile>,
    detector: Option<DetectorConfigFile>,
    model: Option<ModelConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
    max_concurrent: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ImagesConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    url: Option<String>,
    min_confidence: Option<f64>,
    max_labels: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    url: Option<String>,
    model_id: Option<String>,
    max_tokens: Option<u32>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub db_path: String,
    pub api: ApiSettings,
    pub images: ImageSettings,
    pub detector: DetectorSettings,
    pub model: ModelSettings,
    pub retention: Duration,
    /// Confidence given to records whose geometry came from the model.
    pub freeform_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub token_path: Option<PathBuf>,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub url: String,
    pub min_confidence: f64,
    pub max_labels: u32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct ModelSettings {
    pub url: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSettings")
            .field("url", &self.url)
            .field("model_id", &self.model_id)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::from_file(AnalyzerConfigFile::default())
    }
}

impl AnalyzerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANALYZER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalyzerConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let images = file.images.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api: ApiSettings {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                token_path: api.token_path,
                max_concurrent: api.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
            },
            images: ImageSettings {
                url: images.url.unwrap_or_else(|| DEFAULT_IMAGES_URL.to_string()),
                timeout: Duration::from_secs(
                    images.timeout_secs.unwrap_or(DEFAULT_IMAGE_TIMEOUT_SECS),
                ),
            },
            detector: DetectorSettings {
                url: detector
                    .url
                    .unwrap_or_else(|| DEFAULT_DETECTOR_URL.to_string()),
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                max_labels: detector.max_labels.unwrap_or(DEFAULT_MAX_LABELS),
                timeout: Duration::from_secs(
                    detector
                        .timeout_secs
                        .unwrap_or(DEFAULT_DETECTOR_TIMEOUT_SECS),
                ),
            },
            model: ModelSettings {
                url: model.url.unwrap_or_else(|| DEFAULT_MODEL_URL.to_string()),
                model_id: model
                    .model_id
                    .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
                max_tokens: model.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                api_key: model.api_key,
                timeout: Duration::from_secs(
                    model.timeout_secs.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS),
                ),
            },
            retention: Duration::from_secs(
                file.retention
                    .and_then(|retention| retention.seconds)
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
            freeform_confidence: file
                .freeform_confidence
                .unwrap_or(DEFAULT_FREEFORM_CONFIDENCE),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("ANALYZER_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = non_empty_env("ANALYZER_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = non_empty_env("ANALYZER_API_TOKEN_PATH") {
            self.api.token_path = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty_env("ANALYZER_IMAGES_URL") {
            self.images.url = url;
        }
        if let Some(url) = non_empty_env("ANALYZER_DETECTOR_URL") {
            self.detector.url = url;
        }
        if let Some(url) = non_empty_env("ANALYZER_MODEL_URL") {
            self.model.url = url;
        }
        if let Some(model_id) = non_empty_env("ANALYZER_MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Some(key) = non_empty_env("ANALYZER_MODEL_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(retention) = non_empty_env("ANALYZER_RETENTION_SECS") {
            let seconds: u64 = retention.trim().parse().map_err(|_| {
                anyhow!("ANALYZER_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        if let Some(confidence) = non_empty_env("ANALYZER_FREEFORM_CONFIDENCE") {
            self.freeform_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("ANALYZER_FREEFORM_CONFIDENCE must be a number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        check_percentage("freeform_confidence", self.freeform_confidence)?;
        check_percentage("detector.min_confidence", self.detector.min_confidence)?;
        if self.detector.max_labels == 0 {
            return Err(anyhow!("detector.max_labels must be greater than zero"));
        }
        if self.model.max_tokens == 0 {
            return Err(anyhow!("model.max_tokens must be greater than zero"));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(anyhow!("model.model_id must not be empty"));
        }
        if self.api.max_concurrent == 0 {
            return Err(anyhow!("api.max_concurrent must be greater than zero"));
        }
        self.api
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api.addr, e))?;

        check_scheme("images.url", &self.images.url, &["file", "http", "https"])?;
        check_scheme("detector.url", &self.detector.url, &["none", "http", "https"])?;
        check_scheme("model.url", &self.model.url, &["http", "https"])?;
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn check_percentage(field: &str, value: f64) -> Result<()> {
    if !is_percentage(value) {
        return Err(anyhow!("{} must be within 0..=100, got {}", field, value));
    }
    Ok(())
}

fn check_scheme(field: &str, value: &str, allowed: &[&str]) -> Result<()> {
    let url = Url::parse(value).map_err(|e| anyhow!("invalid {} '{}': {}", field, value, e))?;
    if !allowed.contains(&url.scheme()) {
        return Err(anyhow!(
            "{} has unsupported scheme '{}'; expected one of {}",
            field,
            url.scheme(),
            allowed.join(", ")
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<AnalyzerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AnalyzerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.retention, Duration::from_secs(259_200));
        assert_eq!(cfg.detector.url, "none://");
        assert_eq!(cfg.freeform_confidence, 50.0);
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut cfg = AnalyzerConfig::default();
        cfg.freeform_confidence = 120.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_model_scheme() {
        let mut cfg = AnalyzerConfig::default();
        cfg.model.url = "file:///tmp/model".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_output_hides_api_key() {
        let mut cfg = AnalyzerConfig::default();
        cfg.model.api_key = Some("sekret-key".to_string());
        assert!(!format!("{:?}", cfg).contains("sekret-key"));
    }
}
