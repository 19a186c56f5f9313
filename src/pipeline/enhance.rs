//! LanguageEnhancer: entities, keywords and a summary over the OCR text.
//!
//! Never fails. A failed NER call empties the entities and drops the remote
//! summary for a leading excerpt; a failed summary alone keeps the entities.
//! Keywords are always local.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use super::cancel::{guard, CancelToken, Cancelled, Interrupted};
use super::http::ProviderError;
use super::types::{EnhancementOutcome, Entity};

pub const NER_MODEL_NAME: &str = "Named Entity Recognition";
pub const SUMMARIZATION_MODEL_NAME: &str = "Text Summarization";
pub const KEYWORD_MODEL_NAME: &str = "Keyword Extraction";

/// Remote NLP calls only see this many characters.
pub const REMOTE_INPUT_CHARS: usize = 1000;
/// Texts shorter than this are never sent for summarization.
pub const MIN_SUMMARY_INPUT_CHARS: usize = 100;
pub const FALLBACK_SUMMARY_CHARS: usize = 200;
pub const MAX_KEYWORDS: usize = 10;

#[async_trait]
pub trait NerClient: Send + Sync {
    async fn recognize_entities(&self, text: &str) -> Result<Vec<Entity>, ProviderError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;
}

enum EntityPass {
    Found(Vec<Entity>),
    /// No NER backend configured.
    Skipped,
    Failed,
}

pub struct LanguageEnhancer {
    ner: Option<Arc<dyn NerClient>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    ner_timeout: Duration,
    summarization_timeout: Duration,
}

impl LanguageEnhancer {
    pub fn new(
        ner: Option<Arc<dyn NerClient>>,
        summarizer: Option<Arc<dyn Summarizer>>,
        ner_timeout: Duration,
        summarization_timeout: Duration,
    ) -> Self {
        Self {
            ner,
            summarizer,
            ner_timeout,
            summarization_timeout,
        }
    }

    /// Enhance extracted data with language features of `ocr_text`.
    ///
    /// Only cancellation escapes; every other failure degrades.
    pub async fn enhance(
        &self,
        structured_data: &Map<String, Value>,
        ocr_text: &str,
        cancel: &CancelToken,
    ) -> Result<EnhancementOutcome, Cancelled> {
        if ocr_text.trim().is_empty() {
            tracing::debug!("No OCR text, skipping language enhancement");
            return Ok(EnhancementOutcome::default());
        }

        tracing::debug!(
            fields = structured_data.len(),
            text_len = ocr_text.len(),
            "Enhancing extraction"
        );

        let mut models = Vec::new();
        let excerpt = leading_chars(ocr_text, REMOTE_INPUT_CHARS);

        let (entities, ner_failed) = match self.extract_entities(excerpt, cancel).await? {
            EntityPass::Found(entities) => {
                models.push(NER_MODEL_NAME);
                (entities, false)
            }
            EntityPass::Skipped => (Vec::new(), false),
            EntityPass::Failed => (Vec::new(), true),
        };

        let keywords = extract_keywords(ocr_text);

        // A failed NER call abandons the remote pass; the summary degrades too.
        let remote = if ner_failed {
            None
        } else {
            self.remote_summary(ocr_text, excerpt, cancel).await?
        };
        let summary = match remote {
            Some(summary) => {
                models.push(SUMMARIZATION_MODEL_NAME);
                summary
            }
            None => fallback_summary(ocr_text),
        };

        models.push(KEYWORD_MODEL_NAME);

        tracing::info!(
            entities = entities.len(),
            keywords = keywords.len(),
            summary_len = summary.len(),
            "Language enhancement complete"
        );

        Ok(EnhancementOutcome {
            entities,
            keywords,
            summary,
            models,
        })
    }

    async fn extract_entities(
        &self,
        excerpt: &str,
        cancel: &CancelToken,
    ) -> Result<EntityPass, Cancelled> {
        let Some(ner) = &self.ner else {
            return Ok(EntityPass::Skipped);
        };

        match guard("ner", self.ner_timeout, cancel, ner.recognize_entities(excerpt)).await {
            Ok(Ok(entities)) => Ok(EntityPass::Found(entities)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Entity recognition failed, skipping remote summary");
                Ok(EntityPass::Failed)
            }
            Err(Interrupted::Cancelled) => Err(Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Entity recognition failed, skipping remote summary");
                Ok(EntityPass::Failed)
            }
        }
    }

    async fn remote_summary(
        &self,
        text: &str,
        excerpt: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>, Cancelled> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(None);
        };
        if text.chars().count() < MIN_SUMMARY_INPUT_CHARS {
            return Ok(None);
        }

        match guard(
            "summarization",
            self.summarization_timeout,
            cancel,
            summarizer.summarize(excerpt),
        )
        .await
        {
            Ok(Ok(summary)) if !summary.is_empty() => Ok(Some(summary)),
            Ok(Ok(_)) => {
                tracing::debug!("Summarizer returned empty text, using excerpt");
                Ok(None)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Summarization failed, using excerpt");
                Ok(None)
            }
            Err(Interrupted::Cancelled) => Err(Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Summarization failed, using excerpt");
                Ok(None)
            }
        }
    }
}

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Top words by frequency. Lower-cased, punctuation stripped, words of
/// three characters or fewer dropped. Ties keep first-occurrence order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = PUNCTUATION.replace_all(&lowered, "");

    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in cleaned.split_whitespace() {
        if word.chars().count() <= 3 {
            continue;
        }
        let count = counts.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    // Stable sort keeps first-occurrence order among equal counts.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// Leading excerpt used when no remote summary is available.
pub fn fallback_summary(text: &str) -> String {
    format!("{}...", leading_chars(text, FALLBACK_SUMMARY_CHARS))
}

fn leading_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ──────────────────────────────────────────────
// Mocks
// ──────────────────────────────────────────────

/// Mock NER returning fixed entities (or failing) and counting calls.
pub struct MockNer {
    entities: Option<Vec<Entity>>,
    calls: AtomicUsize,
}

impl MockNer {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: Some(entities),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            entities: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NerClient for MockNer {
    async fn recognize_entities(&self, _text: &str) -> Result<Vec<Entity>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entities.clone().ok_or(ProviderError::Status {
            status: 503,
            body: "model loading".into(),
        })
    }
}

/// Mock summarizer returning a fixed summary (or failing) and counting calls.
pub struct MockSummarizer {
    summary: Option<String>,
    calls: AtomicUsize,
}

impl MockSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: Some(summary.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            summary: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summary.clone().ok_or(ProviderError::Timeout)
    }
}
