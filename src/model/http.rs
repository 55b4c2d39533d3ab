//! Messages-API vision model client.
//!
//! Sends one user turn holding a base64 image block and a text block, and
//! concatenates the text blocks of the reply.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::VisionModel;
use crate::error::{Collaborator, CollaboratorError};
use crate::ingest::SourceImage;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

#[derive(Clone, Debug)]
pub struct HttpVisionModelConfig {
    pub url: Url,
    pub model_id: String,
    pub max_tokens: u32,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct HttpVisionModel {
    config: HttpVisionModelConfig,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl HttpVisionModel {
    pub fn new(config: HttpVisionModelConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    fn request_body(&self, image: &SourceImage, prompt: &str) -> serde_json::Value {
        json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": image.media_type,
                                "data": image.base64(),
                            }
                        },
                        {
                            "type": "text",
                            "text": prompt,
                        }
                    ]
                }
            ]
        })
    }
}

/// Extract the reply text from a messages-API envelope.
///
/// An envelope that is not JSON is a collaborator failure. An envelope with
/// no text blocks is an empty reply.
pub(crate) fn reply_text(envelope: &str) -> Result<String, CollaboratorError> {
    let reply: MessagesReply = serde_json::from_str(envelope).map_err(|e| {
        CollaboratorError::unexpected(Collaborator::Model, format!("invalid model envelope: {}", e))
    })?;
    let text = reply
        .content
        .into_iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    Ok(text)
}

impl VisionModel for HttpVisionModel {
    fn name(&self) -> &'static str {
        "http"
    }

    fn infer(&self, image: &SourceImage, prompt: &str) -> Result<String, CollaboratorError> {
        let body = self.request_body(image, prompt).to_string();
        let mut request = self
            .agent
            .post(self.config.url.as_str())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        if let Some(key) = &self.config.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        log::info!(
            "invoking vision model '{}' for {}",
            self.config.model_id,
            image.key
        );
        let response = request
            .send_string(&body)
            .map_err(|e| CollaboratorError::from_http(Collaborator::Model, e))?;
        let envelope = response
            .into_string()
            .map_err(|e| CollaboratorError::from_io(Collaborator::Model, &e))?;
        reply_text(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::TINY_PNG;

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let envelope = r#"{
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "{\"equipment\": "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "[]}"}
            ],
            "stop_reason": "end_turn"
        }"#;
        assert_eq!(reply_text(envelope).unwrap(), r#"{"equipment": []}"#);
    }

    #[test]
    fn envelope_without_text_is_empty_reply() {
        assert_eq!(reply_text(r#"{"content": []}"#).unwrap(), "");
        assert_eq!(reply_text("{}").unwrap(), "");
    }

    #[test]
    fn non_json_envelope_is_collaborator_failure() {
        let err = reply_text("<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.collaborator, Collaborator::Model);
    }

    #[test]
    fn request_carries_image_and_prompt() {
        let model = HttpVisionModel::new(HttpVisionModelConfig {
            url: Url::parse("http://127.0.0.1:1/invoke").unwrap(),
            model_id: "test-model".to_string(),
            max_tokens: 2000,
            api_key: None,
            timeout: Duration::from_secs(1),
        });
        let image = SourceImage::from_bytes("a.png", TINY_PNG.to_vec()).unwrap();
        let body = model.request_body(&image, "classify");

        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["max_tokens"], 2000);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], image.base64());
        assert_eq!(content[1]["text"], "classify");
    }
}
