//! Anthropic messages API with a base64 image block.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{VisionProvider, VisionRequest};
use crate::pipeline::http::{endpoint, send_json, ProviderError};

pub const ANTHROPIC_MODEL_NAME: &str = "Claude 3 Sonnet";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_TOKENS: u32 = 2000;

pub struct AnthropicVision {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl AnthropicVision {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, "messages"),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: [Block<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Block<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    text: Option<String>,
}

#[async_trait]
impl VisionProvider for AnthropicVision {
    fn name(&self) -> &str {
        ANTHROPIC_MODEL_NAME
    }

    async fn analyze(&self, request: &VisionRequest<'_>) -> Result<String, ProviderError> {
        tracing::debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            image_bytes = request.document.len(),
            "Sending messages request"
        );

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: [Message {
                role: "user",
                content: [
                    Block::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: request.document.media_type(),
                            data: request.document.base64(),
                        },
                    },
                    Block::Text {
                        text: request.prompt,
                    },
                ],
            }],
        };

        let value = send_json(
            self.client
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
            &self.url,
        )
        .await?;

        let parsed: MessagesResponse =
            serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .filter(|text| !text.is_empty())
            .ok_or(ProviderError::MissingContent)
    }
}
