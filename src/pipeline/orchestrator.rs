//! Extraction orchestrator.
//!
//! Single entry point that drives one document through the full pipeline:
//! ingest → classify → OCR → vision → enhance → aggregate.
//!
//! Every capability sits behind a trait, so the orchestrator runs end-to-end
//! against mock implementations in tests.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;
use uuid::Uuid;

use super::aggregate;
use super::cancel::{CancelToken, Cancelled};
use super::classify::{Classifier, ImageClassifier};
use super::enhance::{LanguageEnhancer, NerClient, Summarizer};
use super::http::{build_client, ProviderError};
use super::huggingface::HuggingFaceClient;
use super::ingest::{self, IngestError};
use super::ocr::{OcrEngine, TesseractCli, TextExtractor, OCR_MODEL_NAME};
use super::types::{
    DocumentType, ExtractionRequest, OcrOutcome, ProcessingResult, ProcessingStep, ProgressEvent,
};
use super::vision::{providers_from_config, VisionError, VisionExtractor, VisionProvider};
use crate::config::PipelineConfig;

/// Recorded in `models_used` when the vision stage degraded to OCR text.
pub const OCR_FALLBACK_MODEL_NAME: &str = "OCR-only fallback";

const UNKNOWN_ERROR: &str = "Unknown error occurred";

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(IngestError),

    #[error(transparent)]
    Vision(VisionError),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ProviderError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<IngestError> for PipelineError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Cancelled(_) => Self::Cancelled,
            IngestError::Worker(reason) => Self::Internal(reason),
            other => Self::Ingest(other),
        }
    }
}

impl From<VisionError> for PipelineError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::Cancelled(_) => Self::Cancelled,
            other => Self::Vision(other),
        }
    }
}

impl PipelineError {
    /// Message placed in the failed `ProcessingResult`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Client(_) => UNKNOWN_ERROR.to_string(),
            other => other.to_string(),
        }
    }
}

// ──────────────────────────────────────────────
// Construction
// ──────────────────────────────────────────────

/// Capability implementations handed to the pipeline.
pub struct PipelineParts {
    pub classifier: Option<Arc<dyn ImageClassifier>>,
    pub ocr: Arc<dyn OcrEngine>,
    /// Priority order: the first provider that answers wins.
    pub vision: Vec<Arc<dyn VisionProvider>>,
    pub ner: Option<Arc<dyn NerClient>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

/// Drives extraction requests. Immutable after construction; one instance
/// can serve many sequential or concurrent runs.
pub struct ExtractionPipeline {
    classifier: Classifier,
    text_extractor: TextExtractor,
    vision: VisionExtractor,
    enhancer: LanguageEnhancer,
    decode_timeout: Duration,
}

impl ExtractionPipeline {
    /// Build the production pipeline: remote providers for every configured
    /// credential and the local `tesseract` executable for OCR.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = build_client(config.timeouts.http_request())?;

        let huggingface = config.huggingface_key().map(|key| {
            Arc::new(HuggingFaceClient::new(
                client.clone(),
                &config.huggingface_base_url,
                key,
            ))
        });

        let parts = PipelineParts {
            classifier: huggingface
                .clone()
                .map(|hf| hf as Arc<dyn ImageClassifier>),
            ocr: Arc::new(TesseractCli::new(config.tesseract_path.clone())),
            vision: providers_from_config(config, &client),
            ner: huggingface.clone().map(|hf| hf as Arc<dyn NerClient>),
            summarizer: huggingface.map(|hf| hf as Arc<dyn Summarizer>),
        };

        tracing::info!(
            vision_providers = parts.vision.len(),
            huggingface = parts.classifier.is_some(),
            "Extraction pipeline ready"
        );

        Ok(Self::with_parts(config, parts))
    }

    /// Build a pipeline from explicit capability implementations. Timeouts
    /// and the OCR language still come from `config`.
    pub fn with_parts(config: &PipelineConfig, parts: PipelineParts) -> Self {
        let timeouts = &config.timeouts;
        Self {
            classifier: Classifier::new(parts.classifier, timeouts.classification()),
            text_extractor: TextExtractor::new(
                parts.ocr,
                config.ocr_language.clone(),
                timeouts.ocr(),
            ),
            vision: VisionExtractor::new(parts.vision, timeouts.vision()),
            enhancer: LanguageEnhancer::new(
                parts.ner,
                parts.summarizer,
                timeouts.ner(),
                timeouts.summarization(),
            ),
            decode_timeout: timeouts.image_decode(),
        }
    }

    /// Run one extraction. Never returns an error: every failure is folded
    /// into a `ProcessingResult` with `success: false`.
    ///
    /// Progress markers go to `progress` when given; a dropped receiver is
    /// ignored.
    pub async fn run(
        &self,
        request: ExtractionRequest,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: &CancelToken,
    ) -> ProcessingResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "extraction",
            %request_id,
            document = %request.document.name(),
        );

        async move {
            let start = Instant::now();
            let progress = Progress(progress);
            let mut trail = RunTrail::default();

            tracing::info!(
                size = request.document.len(),
                media_type = request.document.media_type(),
                "Extraction started"
            );

            let outcome = AssertUnwindSafe(self.execute(&request, &progress, cancel, &mut trail))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(&*panic))));

            match outcome {
                Ok(success) => {
                    let elapsed = start.elapsed();
                    tracing::info!(
                        elapsed_ms = %elapsed.as_millis(),
                        confidence = success.confidence,
                        models = trail.models_used.len(),
                        "Extraction complete"
                    );
                    ProcessingResult {
                        request_id,
                        success: true,
                        data: Some(success.data),
                        document_type: trail.document_type,
                        confidence: success.confidence,
                        processing_time_ms: elapsed.as_millis() as u64,
                        models_used: trail.models_used,
                        error: None,
                    }
                }
                Err(e) => {
                    progress.emit(ProcessingStep::Error, 0);
                    let elapsed = start.elapsed();
                    match &e {
                        PipelineError::Ingest(ie) if ie.is_validation() => tracing::warn!(
                            error = %e,
                            elapsed_ms = %elapsed.as_millis(),
                            "Extraction rejected"
                        ),
                        PipelineError::Cancelled => tracing::warn!(
                            elapsed_ms = %elapsed.as_millis(),
                            "Extraction cancelled"
                        ),
                        _ => tracing::error!(
                            error = %e,
                            elapsed_ms = %elapsed.as_millis(),
                            "Extraction failed"
                        ),
                    }
                    ProcessingResult {
                        request_id,
                        success: false,
                        data: None,
                        document_type: trail.document_type,
                        confidence: 0.0,
                        processing_time_ms: elapsed.as_millis() as u64,
                        models_used: trail.models_used,
                        error: Some(e.user_message()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &ExtractionRequest,
        progress: &Progress,
        cancel: &CancelToken,
        trail: &mut RunTrail,
    ) -> Result<Success, PipelineError> {
        let requirement = request.requirement.as_ref();

        progress.emit(ProcessingStep::Uploading, 0);
        checkpoint(cancel)?;
        let document = ingest::ingest(&request.document, self.decode_timeout, cancel).await?;

        progress.emit(ProcessingStep::Analyzing, 20);
        checkpoint(cancel)?;
        let classification = self.classifier.classify(&document, requirement, cancel).await?;
        if let Some(model) = classification.model_used {
            trail.models_used.push(model.to_string());
        }
        let document_type = classification.label;
        trail.document_type = Some(document_type.clone());

        progress.emit(ProcessingStep::Analyzing, 40);
        checkpoint(cancel)?;
        let ocr_result = self.text_extractor.extract(&document, cancel).await;
        self.text_extractor.shutdown().await;
        let ocr = match ocr_result? {
            Some(outcome) => {
                trail.models_used.push(OCR_MODEL_NAME.to_string());
                outcome
            }
            None => OcrOutcome::empty(),
        };

        progress.emit(ProcessingStep::Extracting, 60);
        checkpoint(cancel)?;
        let (vision_data, vision_confidence) = match self
            .vision
            .analyze(&document, &request.query, &document_type, &ocr.text, cancel)
            .await
        {
            Ok(outcome) => {
                trail.models_used.push(outcome.provider_used.clone());
                (outcome.payload.to_data(), outcome.confidence)
            }
            Err(VisionError::AllProvidersFailed { failures }) => {
                tracing::warn!(
                    attempts = failures.len(),
                    "Vision providers exhausted, falling back to OCR text"
                );
                trail.models_used.push(OCR_FALLBACK_MODEL_NAME.to_string());
                aggregate::degraded_seed(&ocr)
            }
            Err(e) => return Err(e.into()),
        };

        progress.emit(ProcessingStep::Structuring, 80);
        checkpoint(cancel)?;
        let enhancement = self.enhancer.enhance(&vision_data, &ocr.text, cancel).await?;
        trail
            .models_used
            .extend(enhancement.models.iter().map(|m| m.to_string()));

        progress.emit(ProcessingStep::Completed, 100);

        let data = aggregate::combine(&vision_data, Some(&enhancement));
        let confidence = aggregate::confidence(
            Some(vision_confidence),
            Some(ocr.normalized_confidence()),
            true,
        );
        aggregate::check_threshold(confidence, requirement);

        Ok(Success { data, confidence })
    }
}

// ──────────────────────────────────────────────
// Run bookkeeping
// ──────────────────────────────────────────────

/// What a run has accumulated so far; survives into failure results.
#[derive(Default)]
struct RunTrail {
    models_used: Vec<String>,
    document_type: Option<DocumentType>,
}

struct Success {
    data: serde_json::Map<String, serde_json::Value>,
    confidence: f64,
}

struct Progress(Option<UnboundedSender<ProgressEvent>>);

impl Progress {
    fn emit(&self, step: ProcessingStep, percent: u8) {
        tracing::debug!(step = step.as_str(), percent, "Progress");
        if let Some(tx) = &self.0 {
            // Receiver may be gone; progress is advisory.
            let _ = tx.send(ProgressEvent { step, percent });
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("stage panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("stage panicked: {msg}")
    } else {
        "stage panicked".to_string()
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::pipeline::classify::MockClassifier;
    use crate::pipeline::enhance::{MockNer, MockSummarizer};
    use crate::pipeline::ocr::MockOcrEngine;
    use crate::pipeline::types::{Document, Entity, ExtractionRequirement};
    use crate::pipeline::vision::{MockVisionProvider, VisionRequest};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    const INVOICE_TEXT: &str = "Invoice 4411 from Acme. Total due 100";

    struct Harness {
        classifier: Arc<MockClassifier>,
        ocr: Arc<MockOcrEngine>,
        vision: Vec<Arc<MockVisionProvider>>,
        ner: Arc<MockNer>,
        summarizer: Arc<MockSummarizer>,
        config: PipelineConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                classifier: Arc::new(MockClassifier::failing(503)),
                ocr: Arc::new(MockOcrEngine::new(INVOICE_TEXT, 80.0)),
                vision: vec![Arc::new(MockVisionProvider::responding(
                    "GPT-4 Vision",
                    r#"{"total":"100"}"#,
                ))],
                ner: Arc::new(MockNer::new(vec![Entity {
                    text: "Acme".into(),
                    label: "ORG".into(),
                    confidence: 0.97,
                }])),
                summarizer: Arc::new(MockSummarizer::new("Acme invoice for 100.")),
                config: PipelineConfig::default(),
            }
        }

        fn pipeline(&self) -> ExtractionPipeline {
            ExtractionPipeline::with_parts(
                &self.config,
                PipelineParts {
                    classifier: Some(self.classifier.clone() as Arc<dyn ImageClassifier>),
                    ocr: self.ocr.clone(),
                    vision: self
                        .vision
                        .iter()
                        .map(|p| p.clone() as Arc<dyn VisionProvider>)
                        .collect(),
                    ner: Some(self.ner.clone() as Arc<dyn NerClient>),
                    summarizer: Some(self.summarizer.clone() as Arc<dyn Summarizer>),
                },
            )
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl VisionProvider for PanickingProvider {
        fn name(&self) -> &str {
            "Broken Vision"
        }

        async fn analyze(&self, _request: &VisionRequest<'_>) -> Result<String, ProviderError> {
            panic!("provider bug")
        }
    }

    fn image_request() -> ExtractionRequest {
        let doc = Document::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg", "inv.jpg");
        ExtractionRequest::new(doc, "Extract invoice number")
    }

    /// Noise image around 2 MB so the downscale path runs.
    fn two_megabyte_bmp() -> Vec<u8> {
        let img = RgbImage::from_fn(1000, 700, |x, y| {
            let v = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503));
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Bmp)
            .unwrap();
        cursor.into_inner()
    }

    async fn run(pipeline: &ExtractionPipeline, request: ExtractionRequest) -> ProcessingResult {
        pipeline.run(request, None, &CancelToken::new()).await
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn large_image_with_failing_classifier_completes() {
        let harness = Harness::new();
        let bytes = two_megabyte_bmp();
        assert!(bytes.len() > 2_000_000);
        let request =
            ExtractionRequest::new(Document::new(bytes, "image/bmp", "scan.bmp"), "Total?");

        let result = run(&harness.pipeline(), request).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.document_type, Some(DocumentType::General));
        let data = result.data.unwrap();
        assert_eq!(data["total"], "100");
        assert_eq!(data["entities"][0]["text"], "Acme");
        assert!(data["keywords"].as_array().is_some());
        assert!(approx(result.confidence, 0.83), "{}", result.confidence);
        assert_eq!(harness.classifier.calls(), 1);
        assert_eq!(
            result.models_used,
            vec![
                "Tesseract OCR",
                "GPT-4 Vision",
                "Named Entity Recognition",
                "Keyword Extraction"
            ]
        );
    }

    #[tokio::test]
    async fn oversized_pdf_is_rejected_before_any_stage() {
        let harness = Harness::new();
        let mut bytes = b"%PDF-1.4".to_vec();
        bytes.resize(12 * 1024 * 1024, 0);
        let request = ExtractionRequest::new(
            Document::new(bytes, "application/pdf", "big.pdf"),
            "anything",
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = harness
            .pipeline()
            .run(request, Some(tx), &CancelToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("File size must be less than 10MB"));
        assert!(result.models_used.is_empty());
        assert!(result.document_type.is_none());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(harness.classifier.calls(), 0);
        assert_eq!(harness.ocr.shutdown_count(), 0);
        assert_eq!(harness.vision[0].calls(), 0);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((event.step, event.percent));
        }
        assert_eq!(
            events,
            vec![(ProcessingStep::Uploading, 0), (ProcessingStep::Error, 0)]
        );
    }

    #[tokio::test]
    async fn prose_vision_answer_is_kept_raw() {
        let mut harness = Harness::new();
        harness.vision = vec![Arc::new(MockVisionProvider::responding(
            "GPT-4 Vision",
            "The invoice total is 100 dollars.",
        ))];

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["rawResponse"], "The invoice total is 100 dollars.");
        assert_eq!(data["extractedText"], "The invoice total is 100 dollars.");
        // 0.6*0.6 + 0.8*0.3 + 0.08
        assert!(approx(result.confidence, 0.68), "{}", result.confidence);
    }

    #[tokio::test]
    async fn empty_ocr_text_skips_remote_enhancement() {
        let mut harness = Harness::new();
        harness.ocr = Arc::new(MockOcrEngine::new("", 0.0));

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        assert_eq!(harness.ner.calls(), 0);
        assert_eq!(harness.summarizer.calls(), 0);
        let data = result.data.unwrap();
        assert_eq!(data["entities"], json!([]));
        assert_eq!(data["keywords"], json!([]));
        assert!(data.get("summary").is_none());
    }

    #[tokio::test]
    async fn missing_vision_credentials_fail_the_run() {
        let mut harness = Harness::new();
        harness.vision = Vec::new();

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No vision AI API key configured"));
        assert!(result.data.is_none());
        assert_eq!(result.models_used, vec!["Tesseract OCR"]);
        assert_eq!(harness.ocr.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn ocr_failure_still_completes() {
        let mut harness = Harness::new();
        harness.ocr = Arc::new(MockOcrEngine::failing("engine crashed"));

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        assert!(!result.models_used.iter().any(|m| m == OCR_MODEL_NAME));
        assert_eq!(result.models_used[0], "GPT-4 Vision");
        assert_eq!(harness.ocr.shutdown_count(), 1);
        // Vision 0.85 and the enhancement credit; OCR drops out.
        assert!(approx(result.confidence, (0.85 * 0.6 + 0.08) / 0.7));
    }

    #[tokio::test]
    async fn requirement_type_bypasses_classifier() {
        let harness = Harness::new();
        let request =
            image_request().with_requirement(ExtractionRequirement::for_type("Purchase Order"));

        let result = run(&harness.pipeline(), request).await;

        assert!(result.success);
        assert_eq!(harness.classifier.calls(), 0);
        assert_eq!(result.document_type.unwrap().as_str(), "Purchase Order");
    }

    #[tokio::test]
    async fn classifier_answer_is_recorded() {
        let mut harness = Harness::new();
        harness.classifier = Arc::new(MockClassifier::new(json!([{"label": "receipt"}])));

        let result = run(&harness.pipeline(), image_request()).await;

        assert_eq!(result.document_type, Some(DocumentType::FinancialInvoice));
        assert_eq!(result.models_used[0], "CLIP Document Classifier");
    }

    #[tokio::test]
    async fn first_provider_failure_falls_back_to_second() {
        let mut harness = Harness::new();
        harness.vision = vec![
            Arc::new(MockVisionProvider::failing("GPT-4 Vision", 500)),
            Arc::new(MockVisionProvider::responding(
                "Claude 3 Sonnet",
                r#"{"name":"Acme"}"#,
            )),
        ];

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        assert!(result.models_used.contains(&"Claude 3 Sonnet".to_string()));
        assert!(!result.models_used.contains(&"GPT-4 Vision".to_string()));
        assert_eq!(result.data.unwrap()["name"], "Acme");
    }

    #[tokio::test]
    async fn exhausted_providers_degrade_to_ocr_text() {
        let mut harness = Harness::new();
        harness.vision = vec![
            Arc::new(MockVisionProvider::failing("GPT-4 Vision", 500)),
            Arc::new(MockVisionProvider::failing("Claude 3 Sonnet", 529)),
        ];

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        assert!(result.models_used.contains(&OCR_FALLBACK_MODEL_NAME.to_string()));
        let data = result.data.unwrap();
        assert_eq!(data["extractedText"], INVOICE_TEXT);
        // Seed 0.4*0.6 + 0.8*0.3 + 0.08
        assert!(approx(result.confidence, 0.56), "{}", result.confidence);
    }

    #[tokio::test]
    async fn hung_provider_times_out_and_next_one_answers() {
        let mut harness = Harness::new();
        harness.config.timeouts = Timeouts {
            vision_secs: 1,
            ..Timeouts::default()
        };
        harness.vision = vec![
            Arc::new(MockVisionProvider::hanging("GPT-4 Vision")),
            Arc::new(MockVisionProvider::responding("Claude 3 Sonnet", r#"{"ok":true}"#)),
        ];

        let result = run(&harness.pipeline(), image_request()).await;

        assert!(result.success);
        assert!(result.models_used.contains(&"Claude 3 Sonnet".to_string()));
    }

    #[tokio::test]
    async fn panicking_provider_becomes_unknown_error() {
        let harness = Harness::new();
        let pipeline = ExtractionPipeline::with_parts(
            &harness.config,
            PipelineParts {
                classifier: None,
                ocr: harness.ocr.clone(),
                vision: vec![Arc::new(PanickingProvider) as Arc<dyn VisionProvider>],
                ner: None,
                summarizer: None,
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = tokio::spawn(async move {
            pipeline
                .run(image_request(), Some(tx), &CancelToken::new())
                .await
        })
        .await
        .expect("run must not propagate the panic");

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown error occurred"));
        assert_eq!(result.models_used, vec!["Tesseract OCR"]);
        assert_eq!(result.confidence, 0.0);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event.step);
        }
        assert_eq!(last, Some(ProcessingStep::Error));
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "stage panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(&*payload), "stage panicked: bad state");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*payload), "stage panicked");
    }

    #[tokio::test]
    async fn progress_arrives_in_order() {
        let harness = Harness::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = harness
            .pipeline()
            .run(image_request(), Some(tx), &CancelToken::new())
            .await;
        assert!(result.success);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push((event.step, event.percent));
        }
        assert_eq!(
            events,
            vec![
                (ProcessingStep::Uploading, 0),
                (ProcessingStep::Analyzing, 20),
                (ProcessingStep::Analyzing, 40),
                (ProcessingStep::Extracting, 60),
                (ProcessingStep::Structuring, 80),
                (ProcessingStep::Completed, 100),
            ]
        );
    }

    #[tokio::test]
    async fn dropped_progress_receiver_is_ignored() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let result = harness
            .pipeline()
            .run(image_request(), Some(tx), &CancelToken::new())
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let harness = Harness::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = harness.pipeline().run(image_request(), None, &cancel).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Extraction cancelled"));
        assert_eq!(harness.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_during_ocr_still_shuts_engine_down() {
        let mut harness = Harness::new();
        harness.ocr =
            Arc::new(MockOcrEngine::new(INVOICE_TEXT, 80.0).with_delay(Duration::from_secs(10)));
        let pipeline = harness.pipeline();

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remote.cancel();
        });

        let result = pipeline.run(image_request(), None, &cancel).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Extraction cancelled"));
        assert_eq!(harness.ocr.shutdown_count(), 1);
        assert_eq!(harness.vision[0].calls(), 0);
        assert_eq!(result.document_type, Some(DocumentType::General));
    }

    #[tokio::test]
    async fn every_result_is_bounded() {
        let harness = Harness::new();
        let result = run(&harness.pipeline(), image_request()).await;
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_ne!(result.request_id, Uuid::nil());
    }

    #[test]
    fn internal_errors_surface_as_unknown() {
        let err = PipelineError::from(IngestError::Worker("task panicked".into()));
        assert_eq!(err.user_message(), "Unknown error occurred");

        let err = PipelineError::from(IngestError::Empty);
        assert_eq!(err.user_message(), "File is empty");

        let err = PipelineError::from(VisionError::Cancelled(Cancelled));
        assert_eq!(err.user_message(), "Extraction cancelled");
    }

    #[test]
    fn production_pipeline_builds_without_credentials() {
        let pipeline = ExtractionPipeline::new(&PipelineConfig::default()).unwrap();
        assert!(!pipeline.vision.is_configured());
    }
}
