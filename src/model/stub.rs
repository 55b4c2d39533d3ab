use std::sync::Mutex;

use super::VisionModel;
use crate::error::{Collaborator, CollaboratorError, FailureKind};
use crate::ingest::SourceImage;

/// Stub model for testing. Replies with canned text and remembers the
/// prompts it was given.
#[derive(Debug)]
pub struct StubVisionModel {
    reply: Result<String, FailureKind>,
    prompts: Mutex<Vec<String>>,
}

impl StubVisionModel {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails with `kind`.
    pub fn failing(kind: FailureKind) -> Self {
        Self {
            reply: Err(kind),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl VisionModel for StubVisionModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, _image: &SourceImage, prompt: &str) -> Result<String, CollaboratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(kind) => Err(CollaboratorError::new(
                Collaborator::Model,
                *kind,
                "stub model failure",
            )),
        }
    }
}
