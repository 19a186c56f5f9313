//! TextExtractor: local OCR through the `tesseract` executable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::cancel::{guard, CancelToken, Cancelled, Interrupted};
use super::types::{Document, OcrOutcome, WordBox};

pub const OCR_MODEL_NAME: &str = "Tesseract OCR";

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR engine not available: {0}")]
    EngineUnavailable(String),

    #[error("OCR processing failed: {0}")]
    Processing(String),

    #[error("OCR does not support media type {0}")]
    UnsupportedMedia(String),
}

/// Local OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        media_type: &str,
        lang: &str,
    ) -> Result<OcrOutcome, OcrError>;

    /// Release engine resources. Called once after every OCR stage.
    async fn shutdown(&self) {}
}

// ──────────────────────────────────────────────
// TesseractCli
// ──────────────────────────────────────────────

/// Runs `tesseract <file> stdout -l <lang> tsv` per call.
pub struct TesseractCli {
    binary: String,
}

impl TesseractCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        media_type: &str,
        lang: &str,
    ) -> Result<OcrOutcome, OcrError> {
        // PDFs are not rasterized here.
        if !media_type.starts_with("image/") {
            return Err(OcrError::UnsupportedMedia(media_type.to_string()));
        }

        let input = tempfile::Builder::new()
            .prefix("docsift-ocr-")
            .tempfile()?;
        tokio::fs::write(input.path(), image_bytes).await?;

        let output = tokio::process::Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(lang)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::EngineUnavailable(self.binary.clone()),
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Processing(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv))
    }
}

/// Parse Tesseract TSV output into text, mean confidence and word boxes.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Level 5 rows are words. Words with confidence -1
/// are kept in the text but excluded from the mean.
pub fn parse_tsv(tsv: &str) -> OcrOutcome {
    let mut text = String::new();
    let mut word_boxes = Vec::new();
    let mut conf_sum = 0.0_f64;
    let mut conf_count = 0_usize;
    let mut current_line: Option<(&str, &str, &str, &str)> = None;

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0].trim() != "5" {
            continue;
        }

        let conf: f64 = match fields[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let line_key = (fields[1], fields[2], fields[3], fields[4]);
        match current_line {
            Some(prev) if prev == line_key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line_key);
        text.push_str(word);

        if conf >= 0.0 {
            conf_sum += conf;
            conf_count += 1;
        }

        if let Some(word_box) = parse_word_box(word, &fields[6..10], conf) {
            word_boxes.push(word_box);
        }
    }

    let confidence = if conf_count == 0 {
        0.0
    } else {
        (conf_sum / conf_count as f64).clamp(0.0, 100.0)
    };

    OcrOutcome {
        text,
        confidence,
        word_boxes,
    }
}

fn parse_word_box(word: &str, geometry: &[&str], conf: f64) -> Option<WordBox> {
    Some(WordBox {
        text: word.to_string(),
        x: geometry[0].trim().parse().ok()?,
        y: geometry[1].trim().parse().ok()?,
        width: geometry[2].trim().parse().ok()?,
        height: geometry[3].trim().parse().ok()?,
        confidence: conf.max(0.0) as f32,
    })
}

// ──────────────────────────────────────────────
// TextExtractor
// ──────────────────────────────────────────────

pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    language: String,
    timeout: Duration,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            language: language.into(),
            timeout,
        }
    }

    /// Run OCR. `Ok(None)` means the stage degraded and the caller should
    /// continue with empty text.
    pub async fn extract(
        &self,
        document: &Document,
        cancel: &CancelToken,
    ) -> Result<Option<OcrOutcome>, Cancelled> {
        let start = std::time::Instant::now();
        let result = guard(
            "ocr",
            self.timeout,
            cancel,
            self.engine
                .recognize(document.bytes(), document.media_type(), &self.language),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    elapsed_ms = %start.elapsed().as_millis(),
                    text_len = outcome.text.len(),
                    words = outcome.word_boxes.len(),
                    confidence = outcome.confidence,
                    "OCR complete"
                );
                Ok(Some(outcome))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "OCR failed, continuing without text");
                Ok(None)
            }
            Err(Interrupted::Cancelled) => Err(Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "OCR failed, continuing without text");
                Ok(None)
            }
        }
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock OCR engine for tests and offline runs.
pub struct MockOcrEngine {
    result: Result<(String, f64), String>,
    delay: Option<Duration>,
    shutdowns: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            result: Ok((text.to_string(), confidence)),
            delay: None,
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            delay: None,
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering, to exercise timeouts and cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(
        &self,
        _image_bytes: &[u8],
        _media_type: &str,
        _lang: &str,
    ) -> Result<OcrOutcome, OcrError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.result {
            Ok((text, confidence)) => Ok(OcrOutcome {
                text: text.clone(),
                confidence: *confidence,
                word_boxes: Vec::new(),
            }),
            Err(reason) => Err(OcrError::Processing(reason.clone())),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
