//! Vision-language model boundary.
//!
//! The model receives the image and the instruction text and returns a
//! single textual reply. No structure is assumed here; everything structural
//! is enforced by `validate`.

pub mod http;
pub mod stub;

pub use http::{HttpVisionModel, HttpVisionModelConfig};
pub use stub::StubVisionModel;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use url::Url;

use crate::config::ModelSettings;
use crate::error::CollaboratorError;
use crate::ingest::SourceImage;

/// Vision-language model trait.
pub trait VisionModel: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Ask the model about `image` using `prompt`; returns the raw reply text.
    fn infer(&self, image: &SourceImage, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Build the configured model client from its URL scheme.
pub fn model_from_settings(settings: &ModelSettings) -> Result<Arc<dyn VisionModel>> {
    let url = Url::parse(&settings.url)
        .map_err(|e| anyhow!("invalid model url '{}': {}", settings.url, e))?;
    match url.scheme() {
        "http" | "https" => Ok(Arc::new(HttpVisionModel::new(HttpVisionModelConfig {
            url,
            model_id: settings.model_id.clone(),
            max_tokens: settings.max_tokens,
            api_key: settings.api_key.clone(),
            timeout: settings.timeout,
        }))),
        other => Err(anyhow!(
            "unsupported model scheme '{}'; expected http(s)",
            other
        )),
    }
}
