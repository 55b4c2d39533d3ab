//! HTTP object store image source.
//!
//! Fetches `GET <base>/<key>`. Status codes are classified the same way for
//! every HTTP collaborator (see `error::kind_for_status`).

use std::io::Read;
use std::time::Duration;

use url::Url;

use super::{ImageSource, SourceImage, MAX_IMAGE_BYTES};
use crate::error::{Collaborator, CollaboratorError};

pub struct HttpImageSource {
    base: Url,
    agent: ureq::Agent,
}

impl HttpImageSource {
    pub fn new(mut base: Url, timeout: Duration) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { base, agent }
    }

    fn object_url(&self, key: &str) -> Result<Url, CollaboratorError> {
        self.base.join(key.trim_start_matches('/')).map_err(|e| {
            CollaboratorError::unexpected(
                Collaborator::ImageSource,
                format!("invalid object key '{}': {}", key, e),
            )
        })
    }
}

impl ImageSource for HttpImageSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch(&self, key: &str) -> Result<SourceImage, CollaboratorError> {
        let url = self.object_url(key)?;
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|e| CollaboratorError::from_http(Collaborator::ImageSource, e))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| CollaboratorError::from_io(Collaborator::ImageSource, &e))?;
        SourceImage::from_bytes(key, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_appends_key_to_base_path() {
        let source = HttpImageSource::new(
            Url::parse("http://127.0.0.1:9000/bucket").unwrap(),
            Duration::from_secs(1),
        );
        let url = source.object_url("uploads/rack.jpg").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/bucket/uploads/rack.jpg");
    }
}
