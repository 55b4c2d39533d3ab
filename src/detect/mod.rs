mod backend;
mod backends;
mod result;

pub use backend::ObjectDetector;
pub use backends::{HttpDetector, HttpDetectorConfig, NoneDetector, StubDetector};
pub use result::DetectedObject;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use url::Url;

use crate::config::DetectorSettings;

/// Build the configured detector from its URL scheme.
///
/// `none://` selects single-model mode.
pub fn detector_from_settings(settings: &DetectorSettings) -> Result<Arc<dyn ObjectDetector>> {
    let url = Url::parse(&settings.url)
        .map_err(|e| anyhow!("invalid detector url '{}': {}", settings.url, e))?;
    match url.scheme() {
        "none" => Ok(Arc::new(NoneDetector)),
        "http" | "https" => Ok(Arc::new(HttpDetector::new(HttpDetectorConfig {
            url,
            min_confidence: settings.min_confidence,
            max_labels: settings.max_labels,
            timeout: settings.timeout,
        }))),
        other => Err(anyhow!(
            "unsupported detector scheme '{}'; expected none or http(s)",
            other
        )),
    }
}
