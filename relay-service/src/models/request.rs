//! Inbound request envelope and the payload sent upstream.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Frame sent by the client to start a relay.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClientRequest {
    /// Selects the prompt templates.
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "type cannot be empty"))]
    pub request_type: String,

    /// Template context. Must be a JSON object.
    pub parameters: serde_json::Value,
}

/// Output of prompt rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Body of the streaming request to the upstream endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
}

impl UpstreamRequest {
    /// Single-turn streaming request carrying one user message.
    pub fn streaming(model: &str, max_tokens: u32, prompt: RenderedPrompt) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.content,
            }],
            stream: true,
            system: prompt.system,
        }
    }
}
