use crate::detect::backend::ObjectDetector;
use crate::detect::result::DetectedObject;
use crate::error::CollaboratorError;
use crate::ingest::SourceImage;

/// Detector that finds nothing.
///
/// Selecting it runs the pipeline in single-model mode: every equipment
/// claim must come from the vision model with its own geometry.
#[derive(Clone, Debug, Default)]
pub struct NoneDetector;

impl ObjectDetector for NoneDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&self, _image: &SourceImage) -> Result<Vec<DetectedObject>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Stub detector for testing. Returns the same objects for every image.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    objects: Vec<DetectedObject>,
}

impl StubDetector {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _image: &SourceImage) -> Result<Vec<DetectedObject>, CollaboratorError> {
        Ok(self.objects.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::BoundingBox;
    use crate::ingest::TINY_PNG;

    #[test]
    fn stub_returns_fixed_objects() {
        let image = SourceImage::from_bytes("a.png", TINY_PNG.to_vec()).unwrap();
        let detector = StubDetector::new(vec![DetectedObject::new(
            "switcher",
            92.0,
            BoundingBox::new(10.0, 10.0, 30.0, 40.0),
        )]);
        assert_eq!(detector.detect(&image).unwrap().len(), 1);
        assert!(NoneDetector.detect(&image).unwrap().is_empty());
    }
}
