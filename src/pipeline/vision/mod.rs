//! VisionExtractor: structured extraction through vision-language models.
//!
//! Providers are tried in priority order. A provider is only present when
//! its credential is configured; an empty list is fatal for the run. A
//! provider that errors or times out hands over to the next one.

pub mod anthropic;
pub mod openai;
pub mod parser;
pub mod prompt;

pub use anthropic::AnthropicVision;
pub use openai::OpenAiVision;
pub use parser::parse_response;
pub use prompt::build_prompt;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::cancel::{guard, CancelToken, Cancelled, Interrupted};
use super::http::ProviderError;
use super::types::{Document, DocumentType, VisionOutcome};
use crate::config::PipelineConfig;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("No vision AI API key configured")]
    NotConfigured,

    #[error("All vision providers failed: {}", .failures.join("; "))]
    AllProvidersFailed { failures: Vec<String> },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Everything a provider needs for one call.
pub struct VisionRequest<'a> {
    pub prompt: &'a str,
    pub document: &'a Document,
}

/// A vision-language model endpoint. Returns the model's raw text answer.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Display name recorded in `models_used`.
    fn name(&self) -> &str;

    async fn analyze(&self, request: &VisionRequest<'_>) -> Result<String, ProviderError>;
}

/// Build the provider list from configuration, in priority order.
pub fn providers_from_config(
    config: &PipelineConfig,
    client: &reqwest::Client,
) -> Vec<Arc<dyn VisionProvider>> {
    let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();
    if let Some(key) = config.openai_key() {
        providers.push(Arc::new(OpenAiVision::new(
            client.clone(),
            &config.openai_base_url,
            key,
            &config.openai_model,
        )));
    }
    if let Some(key) = config.anthropic_key() {
        providers.push(Arc::new(AnthropicVision::new(
            client.clone(),
            &config.anthropic_base_url,
            key,
            &config.anthropic_model,
        )));
    }
    providers
}

pub struct VisionExtractor {
    providers: Vec<Arc<dyn VisionProvider>>,
    timeout: Duration,
}

impl VisionExtractor {
    /// `timeout` applies to each provider call separately.
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    pub async fn analyze(
        &self,
        document: &Document,
        query: &str,
        document_type: &DocumentType,
        ocr_text: &str,
        cancel: &CancelToken,
    ) -> Result<VisionOutcome, VisionError> {
        if self.providers.is_empty() {
            return Err(VisionError::NotConfigured);
        }

        let prompt = build_prompt(query, document_type, ocr_text);
        let request = VisionRequest {
            prompt: &prompt,
            document,
        };

        let mut failures = Vec::new();
        for provider in &self.providers {
            let start = std::time::Instant::now();
            let result = guard("vision", self.timeout, cancel, provider.analyze(&request)).await;

            let error = match result {
                Ok(Ok(content)) => {
                    let (payload, confidence) = parse_response(&content);
                    tracing::info!(
                        provider = provider.name(),
                        elapsed_ms = %start.elapsed().as_millis(),
                        response_len = content.len(),
                        structured = payload.is_structured(),
                        confidence,
                        "Vision analysis complete"
                    );
                    return Ok(VisionOutcome {
                        payload,
                        confidence,
                        provider_used: provider.name().to_string(),
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(Interrupted::Cancelled) => return Err(Cancelled.into()),
                Err(e) => e.to_string(),
            };

            tracing::warn!(
                provider = provider.name(),
                error = %error,
                "Vision provider failed, trying next"
            );
            failures.push(format!("{}: {error}", provider.name()));
        }

        Err(VisionError::AllProvidersFailed { failures })
    }
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock provider returning a fixed answer, a fixed HTTP failure, or nothing
/// at all (hangs until cancelled or timed out).
pub struct MockVisionProvider {
    name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

enum MockBehavior {
    Respond(String),
    Fail(u16),
    Hang,
}

impl MockVisionProvider {
    pub fn responding(name: &str, content: &str) -> Self {
        Self::with_behavior(name, MockBehavior::Respond(content.to_string()))
    }

    pub fn failing(name: &str, status: u16) -> Self {
        Self::with_behavior(name, MockBehavior::Fail(status))
    }

    pub fn hanging(name: &str) -> Self {
        Self::with_behavior(name, MockBehavior::Hang)
    }

    fn with_behavior(name: &str, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _request: &VisionRequest<'_>) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Respond(content) => Ok(content.clone()),
            MockBehavior::Fail(status) => Err(ProviderError::Status {
                status: *status,
                body: "mock failure".into(),
            }),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::VisionPayload;

    fn doc() -> Document {
        Document::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg", "invoice.jpg")
    }

    fn extractor(providers: Vec<Arc<MockVisionProvider>>, timeout: Duration) -> VisionExtractor {
        VisionExtractor::new(
            providers
                .into_iter()
                .map(|p| p as Arc<dyn VisionProvider>)
                .collect(),
            timeout,
        )
    }

    async fn run(extractor: &VisionExtractor) -> Result<VisionOutcome, VisionError> {
        extractor
            .analyze(
                &doc(),
                "Extract invoice number",
                &DocumentType::FinancialInvoice,
                "INVOICE",
                &CancelToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn empty_provider_list_is_not_configured() {
        let extractor = VisionExtractor::new(Vec::new(), Duration::from_secs(5));
        assert!(!extractor.is_configured());
        let err = run(&extractor).await.unwrap_err();
        assert!(matches!(err, VisionError::NotConfigured));
        assert_eq!(err.to_string(), "No vision AI API key configured");
    }

    #[tokio::test]
    async fn first_provider_answer_wins() {
        let a = Arc::new(MockVisionProvider::responding("GPT-4 Vision", r#"{"total":"100.00"}"#));
        let b = Arc::new(MockVisionProvider::responding("Claude 3 Sonnet", "{}"));
        let extractor = extractor(vec![a.clone(), b.clone()], Duration::from_secs(5));

        let outcome = run(&extractor).await.unwrap();
        assert_eq!(outcome.provider_used, "GPT-4 Vision");
        assert_eq!(outcome.confidence, 0.85);
        assert!(matches!(outcome.payload, VisionPayload::Structured(_)));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn http_failure_falls_through_to_next_provider() {
        let a = Arc::new(MockVisionProvider::failing("GPT-4 Vision", 500));
        let b = Arc::new(MockVisionProvider::responding("Claude 3 Sonnet", "The total is 100"));
        let extractor = extractor(vec![a.clone(), b], Duration::from_secs(5));

        let outcome = run(&extractor).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(outcome.provider_used, "Claude 3 Sonnet");
        assert_eq!(outcome.confidence, 0.6);
        assert_eq!(outcome.payload.to_data()["rawResponse"], "The total is 100");
    }

    #[tokio::test]
    async fn hung_provider_is_cut_off_by_timeout() {
        let a = Arc::new(MockVisionProvider::hanging("GPT-4 Vision"));
        let b = Arc::new(MockVisionProvider::responding("Claude 3 Sonnet", r#"{"ok":true}"#));
        let extractor = extractor(vec![a, b], Duration::from_millis(30));

        let outcome = run(&extractor).await.unwrap();
        assert_eq!(outcome.provider_used, "Claude 3 Sonnet");
    }

    #[tokio::test]
    async fn all_failures_are_collected() {
        let a = Arc::new(MockVisionProvider::failing("GPT-4 Vision", 500));
        let b = Arc::new(MockVisionProvider::failing("Claude 3 Sonnet", 529));
        let extractor = extractor(vec![a, b], Duration::from_secs(5));

        match run(&extractor).await.unwrap_err() {
            VisionError::AllProvidersFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("GPT-4 Vision: "));
                assert!(failures[1].contains("529"));
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_fallback_chain() {
        let a = Arc::new(MockVisionProvider::hanging("GPT-4 Vision"));
        let b = Arc::new(MockVisionProvider::responding("Claude 3 Sonnet", "{}"));
        let extractor = extractor(vec![a, b.clone()], Duration::from_secs(10));

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.cancel();
        });

        let err = extractor
            .analyze(&doc(), "q", &DocumentType::General, "", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Cancelled(_)));
        assert_eq!(b.calls(), 0);
    }

    #[test]
    fn providers_follow_configured_credentials() {
        let client = reqwest::Client::new();

        let none = providers_from_config(&PipelineConfig::default(), &client);
        assert!(none.is_empty());

        let both = providers_from_config(
            &PipelineConfig {
                openai_api_key: Some("sk-a".into()),
                anthropic_api_key: Some("ak-b".into()),
                ..Default::default()
            },
            &client,
        );
        let names: Vec<&str> = both.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["GPT-4 Vision", "Claude 3 Sonnet"]);

        let placeholder = providers_from_config(
            &PipelineConfig {
                openai_api_key: Some("your-openai-api-key-here".into()),
                anthropic_api_key: Some("ak-b".into()),
                ..Default::default()
            },
            &client,
        );
        let names: Vec<&str> = placeholder.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["Claude 3 Sonnet"]);
    }
}
