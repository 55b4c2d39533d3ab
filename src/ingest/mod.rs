//! Image acquisition.
//!
//! This module provides sources for uploaded equipment photos:
//! - Local directory (`file://<root>`)
//! - HTTP object store (`http(s)://<base>`)
//!
//! All sources produce `SourceImage` instances that flow into the detector
//! and the vision model. The ingestion layer is responsible for:
//! - Refusing keys that escape the configured root
//! - Enforcing the maximum image size
//! - Sniffing the media type from magic bytes
//! - Classifying failures (not found, access denied, timed out)

pub mod file;
pub mod http;

pub use file::FileImageSource;
pub use http::HttpImageSource;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{Collaborator, CollaboratorError, FailureKind};

/// Largest image accepted for analysis.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Image source trait.
///
/// Implementations are shared between concurrent analyses and must not hold
/// per-image state.
pub trait ImageSource: Send + Sync {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Fetch the image stored under `key`.
    fn fetch(&self, key: &str) -> Result<SourceImage, CollaboratorError>;

    /// Persist an uploaded image under `image.key`.
    fn store(&self, image: &SourceImage) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::new(
            Collaborator::ImageSource,
            FailureKind::AccessDenied,
            format!("{} image source is read-only; cannot store '{}'", self.name(), image.key),
        ))
    }
}

/// Image bytes plus what downstream collaborators need to know about them.
#[derive(Clone, Debug)]
pub struct SourceImage {
    pub key: String,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub sha256: [u8; 32],
}

impl SourceImage {
    /// Validate size and media type, then wrap.
    pub fn from_bytes(key: &str, bytes: Vec<u8>) -> Result<Self, CollaboratorError> {
        if bytes.is_empty() {
            return Err(CollaboratorError::unexpected(
                Collaborator::ImageSource,
                format!("image '{}' is empty", key),
            ));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(CollaboratorError::unexpected(
                Collaborator::ImageSource,
                format!(
                    "image '{}' is {} bytes; limit is {}",
                    key,
                    bytes.len(),
                    MAX_IMAGE_BYTES
                ),
            ));
        }
        let media_type = sniff_media_type(&bytes).ok_or_else(|| {
            CollaboratorError::unexpected(
                Collaborator::ImageSource,
                format!("image '{}' is not a supported image format", key),
            )
        })?;
        let sha256 = Sha256::digest(&bytes).into();
        Ok(Self {
            key: key.to_string(),
            bytes,
            media_type,
            sha256,
        })
    }

    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// File extension matching the sniffed media type.
    pub fn extension(&self) -> &'static str {
        match self.media_type {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Build the configured image source from its URL.
pub fn image_source_from_url(url: &str, timeout: Duration) -> Result<Arc<dyn ImageSource>> {
    let parsed = Url::parse(url).map_err(|e| anyhow!("invalid image source url '{}': {}", url, e))?;
    match parsed.scheme() {
        "file" => {
            let root = parsed
                .to_file_path()
                .map_err(|_| anyhow!("image source url '{}' is not a local directory", url))?;
            Ok(Arc::new(FileImageSource::new(root)))
        }
        "http" | "https" => Ok(Arc::new(HttpImageSource::new(parsed, timeout))),
        other => Err(anyhow!(
            "unsupported image source scheme '{}'; expected file or http(s)",
            other
        )),
    }
}

#[cfg(test)]
pub(crate) const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];
