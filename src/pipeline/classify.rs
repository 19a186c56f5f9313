//! Classifier: resolves the document-type label that steers the vision prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::cancel::{guard, CancelToken, Cancelled, Interrupted};
use super::http::ProviderError;
use super::types::{ClassificationOutcome, Document, DocumentType, ExtractionRequirement};

pub const CLASSIFIER_MODEL_NAME: &str = "CLIP Document Classifier";

/// Ordered keyword rules over the lower-cased classifier response.
/// First match wins; no match means `general`.
const KEYWORD_RULES: &[(&[&str], &str)] = &[
    (&["contract", "legal"], "legal-contract"),
    (&["invoice", "receipt"], "financial-invoice"),
    (&["medical", "health"], "medical-record"),
    (&["technical", "specification"], "technical-specification"),
];

/// Zero-shot image classification backend. Returns the provider's raw JSON.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify_image(&self, document: &Document) -> Result<Value, ProviderError>;
}

pub struct Classifier {
    backend: Option<Arc<dyn ImageClassifier>>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(backend: Option<Arc<dyn ImageClassifier>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// A caller-supplied type wins outright. Otherwise ask the remote
    /// classifier and map its answer; any failure yields `general`.
    pub async fn classify(
        &self,
        document: &Document,
        requirement: Option<&ExtractionRequirement>,
        cancel: &CancelToken,
    ) -> Result<ClassificationOutcome, Cancelled> {
        if let Some(requested) = requirement.and_then(ExtractionRequirement::requested_type) {
            tracing::debug!(document_type = requested, "Using caller-supplied document type");
            return Ok(ClassificationOutcome {
                label: DocumentType::from_id(requested),
                model_used: None,
            });
        }

        let general = ClassificationOutcome {
            label: DocumentType::General,
            model_used: None,
        };

        let Some(backend) = &self.backend else {
            tracing::debug!("No classifier configured, defaulting to general");
            return Ok(general);
        };

        if !document.is_image() {
            tracing::debug!(
                media_type = document.media_type(),
                "Classifier only accepts images, defaulting to general"
            );
            return Ok(general);
        }

        let start = std::time::Instant::now();
        match guard(
            "classification",
            self.timeout,
            cancel,
            backend.classify_image(document),
        )
        .await
        {
            Ok(Ok(response)) => {
                let label = label_from_response(&response);
                tracing::info!(
                    document_type = %label,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "Document classified"
                );
                Ok(ClassificationOutcome {
                    label,
                    model_used: Some(CLASSIFIER_MODEL_NAME),
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Classification failed, defaulting to general");
                Ok(general)
            }
            Err(Interrupted::Cancelled) => Err(Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Classification failed, defaulting to general");
                Ok(general)
            }
        }
    }
}

/// Map a classifier response onto the document-type vocabulary.
pub fn label_from_response(response: &Value) -> DocumentType {
    let haystack = response.to_string().to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(_, id)| DocumentType::from_id(id))
        .unwrap_or(DocumentType::General)
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock classifier returning a fixed response (or a fixed failure).
pub struct MockClassifier {
    response: Result<Value, u16>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(response: Value) -> Self {
        Self {
            response: Ok(response),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with the given HTTP status.
    pub fn failing(status: u16) -> Self {
        Self {
            response: Err(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for MockClassifier {
    async fn classify_image(&self, _document: &Document) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(value) => Ok(value.clone()),
            Err(status) => Err(ProviderError::Status {
                status: *status,
                body: "mock failure".into(),
            }),
        }
    }
}
