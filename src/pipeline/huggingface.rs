//! Hosted-inference client for the HuggingFace-backed capabilities:
//! zero-shot image classification, NER and summarization.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::classify::ImageClassifier;
use super::enhance::{NerClient, Summarizer};
use super::http::{endpoint, send_json, ProviderError};
use super::types::{Document, Entity};

pub const CLASSIFICATION_MODEL: &str = "openai/clip-vit-large-patch14";
pub const NER_MODEL: &str = "dbmdz/bert-large-cased-finetuned-conll03-english";
pub const SUMMARIZATION_MODEL: &str = "facebook/bart-large-cnn";

const SUMMARY_MAX_LENGTH: u32 = 150;
const SUMMARY_MIN_LENGTH: u32 = 50;

pub struct HuggingFaceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HuggingFaceClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn model_url(&self, model: &str) -> String {
        endpoint(&self.base_url, &format!("models/{model}"))
    }

    async fn post_json(&self, model: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = self.model_url(model);
        send_json(
            self.client.post(&url).bearer_auth(&self.api_key).json(body),
            &url,
        )
        .await
    }
}

#[derive(Deserialize)]
struct NerRow {
    word: String,
    #[serde(default)]
    entity_group: Option<String>,
    #[serde(default)]
    entity: Option<String>,
    score: f64,
}

#[derive(Deserialize)]
struct SummaryRow {
    summary_text: Option<String>,
}

#[async_trait]
impl ImageClassifier for HuggingFaceClient {
    async fn classify_image(&self, document: &Document) -> Result<Value, ProviderError> {
        let url = self.model_url(CLASSIFICATION_MODEL);
        let part = reqwest::multipart::Part::bytes(document.bytes().to_vec())
            .file_name(document.name().to_string())
            .mime_str(document.media_type())
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("inputs", part);

        tracing::debug!(image_bytes = document.len(), "Sending classification request");
        send_json(
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .multipart(form),
            &url,
        )
        .await
    }
}

#[async_trait]
impl NerClient for HuggingFaceClient {
    async fn recognize_entities(&self, text: &str) -> Result<Vec<Entity>, ProviderError> {
        let value = self.post_json(NER_MODEL, &json!({ "inputs": text })).await?;
        let rows: Vec<NerRow> =
            serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| Entity {
                text: row.word,
                label: row.entity_group.or(row.entity).unwrap_or_default(),
                confidence: row.score,
            })
            .collect())
    }
}

#[async_trait]
impl Summarizer for HuggingFaceClient {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        let body = json!({
            "inputs": text,
            "parameters": {
                "max_length": SUMMARY_MAX_LENGTH,
                "min_length": SUMMARY_MIN_LENGTH,
            }
        });
        let value = self.post_json(SUMMARIZATION_MODEL, &body).await?;
        let rows: Vec<SummaryRow> =
            serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        rows.into_iter()
            .next()
            .and_then(|row| row.summary_text)
            .ok_or(ProviderError::MissingContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::http::{build_client, test_server};
    use axum::extract::Multipart;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    fn client(base: &str) -> HuggingFaceClient {
        HuggingFaceClient::new(build_client(Duration::from_secs(5)).unwrap(), base, "hf_test")
    }

    fn json_route(path: &str, seen: Seen, reply: Value) -> Router {
        Router::new().route(
            path,
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    seen.lock().unwrap().push((auth, body));
                    Json(reply)
                }
            }),
        )
    }

    #[tokio::test]
    async fn classification_posts_multipart_inputs() {
        let seen: Arc<Mutex<Option<(String, String, Vec<u8>)>>> = Arc::default();
        let recorder = seen.clone();
        let router = Router::new().route(
            "/models/openai/clip-vit-large-patch14",
            post(move |headers: HeaderMap, mut multipart: Multipart| {
                let recorder = recorder.clone();
                async move {
                    let field = multipart.next_field().await.unwrap().unwrap();
                    let name = field.name().unwrap().to_string();
                    let bytes = field.bytes().await.unwrap().to_vec();
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    *recorder.lock().unwrap() = Some((auth, name, bytes));
                    Json(json!([{"label": "invoice", "score": 0.7}]))
                }
            }),
        );
        let base = test_server::spawn(router).await;

        let document = Document::new(vec![0xFF, 0xD8, 0xFF, 0x01], "image/jpeg", "a.jpg");
        let value = client(&base).classify_image(&document).await.unwrap();
        assert_eq!(value[0]["label"], "invoice");

        let (auth, field, bytes) = seen.lock().unwrap().take().unwrap();
        assert_eq!(auth, "Bearer hf_test");
        assert_eq!(field, "inputs");
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0x01]);
    }

    #[tokio::test]
    async fn ner_maps_rows_onto_entities() {
        let seen: Seen = Arc::default();
        let reply = json!([
            {"word": "Acme", "entity_group": "ORG", "score": 0.98, "start": 0, "end": 4},
            {"word": "Paris", "entity": "B-LOC", "score": 0.91}
        ]);
        let base = test_server::spawn(json_route(
            "/models/dbmdz/bert-large-cased-finetuned-conll03-english",
            seen.clone(),
            reply,
        ))
        .await;

        let entities = client(&base).recognize_entities("Acme in Paris").await.unwrap();
        assert_eq!(
            entities,
            vec![
                Entity {
                    text: "Acme".into(),
                    label: "ORG".into(),
                    confidence: 0.98
                },
                Entity {
                    text: "Paris".into(),
                    label: "B-LOC".into(),
                    confidence: 0.91
                },
            ]
        );

        let calls = seen.lock().unwrap();
        assert_eq!(calls[0].0, "Bearer hf_test");
        assert_eq!(calls[0].1, json!({"inputs": "Acme in Paris"}));
    }

    #[tokio::test]
    async fn ner_error_object_is_malformed() {
        let seen: Seen = Arc::default();
        let base = test_server::spawn(json_route(
            "/models/dbmdz/bert-large-cased-finetuned-conll03-english",
            seen,
            json!({"error": "Model is loading"}),
        ))
        .await;

        let err = client(&base).recognize_entities("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn summarization_sends_length_parameters() {
        let seen: Seen = Arc::default();
        let base = test_server::spawn(json_route(
            "/models/facebook/bart-large-cnn",
            seen.clone(),
            json!([{"summary_text": "A short summary."}]),
        ))
        .await;

        let summary = client(&base).summarize("long text").await.unwrap();
        assert_eq!(summary, "A short summary.");

        let calls = seen.lock().unwrap();
        assert_eq!(
            calls[0].1,
            json!({"inputs": "long text", "parameters": {"max_length": 150, "min_length": 50}})
        );
    }

    #[tokio::test]
    async fn summarization_without_text_is_missing_content() {
        let seen: Seen = Arc::default();
        let base = test_server::spawn(json_route(
            "/models/facebook/bart-large-cnn",
            seen,
            json!([]),
        ))
        .await;

        let err = client(&base).summarize("long text").await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingContent));
    }
}
