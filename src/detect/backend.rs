use crate::detect::result::DetectedObject;
use crate::error::CollaboratorError;
use crate::ingest::SourceImage;

/// Object detector backend trait.
///
/// Backends return geometry only; equipment semantics come from the vision
/// model. Implementations are shared across concurrent analyses, so
/// `detect` takes `&self` and any client state must be `Sync`.
pub trait ObjectDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an image.
    ///
    /// Only detections that carry a bounding box are returned, in a
    /// deterministic order.
    fn detect(&self, image: &SourceImage) -> Result<Vec<DetectedObject>, CollaboratorError>;
}
