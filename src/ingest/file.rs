//! Local directory image source.
//!
//! Keys are resolved relative to a fixed root. The source never follows a
//! key outside that root.

use std::path::{Component, Path, PathBuf};

use super::{ImageSource, SourceImage, MAX_IMAGE_BYTES};
use crate::error::{Collaborator, CollaboratorError, FailureKind};

pub struct FileImageSource {
    root: PathBuf,
}

impl FileImageSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, CollaboratorError> {
        if !is_contained_key(key) {
            return Err(CollaboratorError::new(
                Collaborator::ImageSource,
                FailureKind::AccessDenied,
                format!("key '{}' escapes the image root", key),
            ));
        }
        Ok(self.root.join(key))
    }
}

impl ImageSource for FileImageSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn fetch(&self, key: &str) -> Result<SourceImage, CollaboratorError> {
        let path = self.resolve(key)?;
        let meta = std::fs::metadata(&path)
            .map_err(|e| CollaboratorError::from_io(Collaborator::ImageSource, &e))?;
        if !meta.is_file() {
            return Err(CollaboratorError::new(
                Collaborator::ImageSource,
                FailureKind::NotFound,
                format!("'{}' is not a file", path.display()),
            ));
        }
        if meta.len() > MAX_IMAGE_BYTES as u64 {
            return Err(CollaboratorError::unexpected(
                Collaborator::ImageSource,
                format!("image '{}' exceeds {} bytes", key, MAX_IMAGE_BYTES),
            ));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| CollaboratorError::from_io(Collaborator::ImageSource, &e))?;
        SourceImage::from_bytes(key, bytes)
    }

    fn store(&self, image: &SourceImage) -> Result<(), CollaboratorError> {
        let path = self.resolve(&image.key)?;
        let io_err = |e: std::io::Error| CollaboratorError::from_io(Collaborator::ImageSource, &e);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Readers never see a partially written image.
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, &image.bytes).map_err(io_err)?;
        std::fs::rename(&staging, &path).map_err(io_err)
    }
}

fn is_contained_key(key: &str) -> bool {
    if key.trim().is_empty() {
        return false;
    }
    Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
