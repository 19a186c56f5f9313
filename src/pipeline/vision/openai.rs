//! OpenAI-compatible chat completions with an inline image.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{VisionProvider, VisionRequest};
use crate::pipeline::http::{endpoint, send_json, ProviderError};

pub const OPENAI_MODEL_NAME: &str = "GPT-4 Vision";

const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f64 = 0.1;

pub struct OpenAiVision {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiVision {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, "chat/completions"),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl VisionProvider for OpenAiVision {
    fn name(&self) -> &str {
        OPENAI_MODEL_NAME
    }

    async fn analyze(&self, request: &VisionRequest<'_>) -> Result<String, ProviderError> {
        tracing::debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            image_bytes = request.document.len(),
            "Sending chat completions request"
        );

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: [
                    ContentPart::Text {
                        text: request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: request.document.data_url(),
                        },
                    },
                ],
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let value = send_json(
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body),
            &self.url,
        )
        .await?;

        let parsed: ChatResponse =
            serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or(ProviderError::MissingContent)
    }
}
