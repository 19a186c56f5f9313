//! Ingestor: upload validation and size reduction.

pub mod downscale;
pub mod format;

pub use downscale::*;
pub use format::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::cancel::{guard, CancelToken, Cancelled, Interrupted};
use super::types::Document;

/// Hard upload limit.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("File size must be less than 10MB")]
    TooLarge { size: usize },

    #[error("File type not supported. Please use PDF or image files.")]
    UnsupportedType(String),

    #[error("File is empty")]
    Empty,

    #[error("Image worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl IngestError {
    /// Validation failures are reported to the caller verbatim.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::TooLarge { .. } | Self::UnsupportedType(_) | Self::Empty)
    }
}

/// Check size, emptiness and media type without touching the payload.
pub fn validate(document: &Document) -> Result<(), IngestError> {
    if document.len() > MAX_FILE_SIZE {
        return Err(IngestError::TooLarge {
            size: document.len(),
        });
    }
    if document.is_empty() {
        return Err(IngestError::Empty);
    }
    if !is_accepted(document.media_type()) {
        return Err(IngestError::UnsupportedType(document.media_type().to_string()));
    }
    Ok(())
}

/// Validate an upload and shrink large images.
///
/// Returns a new `Document`; the input is left untouched. A decode or encode
/// failure, or a decode slower than `decode_timeout`, is not a validation
/// failure: the original bytes pass through.
pub async fn ingest(
    document: &Document,
    decode_timeout: Duration,
    cancel: &CancelToken,
) -> Result<Document, IngestError> {
    let media_type = resolve_media_type(document.media_type(), document.name(), document.bytes());
    let name = sanitize_filename(document.name());
    let candidate = Document::new(document.bytes().to_vec(), media_type, name);

    validate(&candidate)?;

    if !candidate.is_image() || !needs_downscale(candidate.len()) {
        tracing::debug!(
            size = candidate.len(),
            media_type = candidate.media_type(),
            "Upload passes through unchanged"
        );
        return Ok(candidate);
    }

    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }

    let original_size = candidate.len();
    let bytes = candidate.bytes().to_vec();
    let abandoned = Arc::new(AtomicBool::new(false));
    let flag = abandoned.clone();
    let worker = tokio::task::spawn_blocking(move || downscale_to_jpeg(&bytes, &flag));

    let outcome = guard("image_decode", decode_timeout, cancel, worker).await;
    if outcome.is_err() {
        // Blocking tasks cannot be aborted. The worker stops at its next
        // phase boundary; a decode in progress still finishes off-thread.
        abandoned.store(true, Ordering::Relaxed);
    }

    let error = match outcome {
        Ok(Ok(Ok(Some(jpeg)))) => {
            tracing::info!(
                from_bytes = original_size,
                to_bytes = jpeg.len(),
                "Large image re-encoded as JPEG"
            );
            return Ok(Document::new(jpeg, "image/jpeg", candidate.name()));
        }
        Ok(Ok(Ok(None))) => "downscale abandoned".to_string(),
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join)) => return Err(IngestError::Worker(join.to_string())),
        Err(Interrupted::Cancelled) => return Err(Cancelled.into()),
        Err(e) => e.to_string(),
    };

    tracing::warn!(
        error = %error,
        size = original_size,
        media_type = candidate.media_type(),
        "Image could not be downscaled, passing original bytes through"
    );
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    const TIMEOUT: Duration = Duration::from_secs(30);

    /// Noisy BMP so the payload clears the downscale threshold.
    fn large_bmp(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503));
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Bmp)
            .unwrap();
        cursor.into_inner()
    }

    #[tokio::test]
    async fn rejects_oversized_file() {
        let doc = Document::new(vec![0u8; MAX_FILE_SIZE + 1], "application/pdf", "big.pdf");
        let err = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "File size must be less than 10MB");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn accepts_exactly_ten_megabytes() {
        let mut bytes = b"%PDF-1.4".to_vec();
        bytes.resize(MAX_FILE_SIZE, b' ');
        let doc = Document::new(bytes, "application/pdf", "edge.pdf");
        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.len(), MAX_FILE_SIZE);
    }

    #[tokio::test]
    async fn rejects_unsupported_type() {
        let doc = Document::new(b"hello".to_vec(), "text/plain", "notes.txt");
        let err = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "File type not supported. Please use PDF or image files."
        );
    }

    #[tokio::test]
    async fn rejects_empty_file() {
        let doc = Document::new(Vec::new(), "image/png", "blank.png");
        let err = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Empty));
    }

    #[tokio::test]
    async fn small_image_passes_through_unchanged() {
        let doc = Document::new(vec![0x89, 0x50, 0x4E, 0x47, 1, 2, 3], "image/png", "s.png");
        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.bytes(), doc.bytes());
        assert_eq!(out.media_type(), "image/png");
    }

    #[tokio::test]
    async fn large_pdf_is_never_decoded() {
        let mut bytes = b"%PDF-1.4".to_vec();
        bytes.resize(2 * 1024 * 1024, 0);
        let doc = Document::new(bytes, "application/pdf", "scan.pdf");
        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.media_type(), "application/pdf");
        assert_eq!(out.len(), doc.len());
    }

    #[tokio::test]
    async fn large_image_is_downscaled_to_jpeg() {
        let bytes = large_bmp(2400, 1000);
        assert!(needs_downscale(bytes.len()));
        let doc = Document::new(bytes, "image/bmp", "photo.bmp");

        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.media_type(), "image/jpeg");
        assert_eq!(out.name(), "photo.bmp");
        assert!(out.len() < doc.len());

        let decoded = image::load_from_memory(out.bytes()).unwrap();
        let longest = decoded.to_rgb8().width().max(decoded.to_rgb8().height());
        assert_eq!(longest, MAX_EDGE_PX);
    }

    #[tokio::test]
    async fn undecodable_large_image_passes_through() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF];
        bytes.resize(2 * 1024 * 1024, 0xAB);
        let doc = Document::new(bytes, "image/jpeg", "broken.jpg");

        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.bytes(), doc.bytes());
        assert_eq!(out.media_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn name_is_sanitized() {
        let doc = Document::new(b"%PDF-1.4".to_vec(), "application/pdf", "../../etc/passwd.pdf");
        let out = ingest(&doc, TIMEOUT, &CancelToken::new()).await.unwrap();
        assert_eq!(out.name(), "passwd.pdf");
    }

    #[tokio::test]
    async fn slow_decode_passes_original_through() {
        let doc = Document::new(large_bmp(1200, 1000), "image/bmp", "photo.bmp");

        let out = ingest(&doc, Duration::from_nanos(1), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out.bytes(), doc.bytes());
        assert_eq!(out.media_type(), "image/bmp");
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_decoding() {
        let doc = Document::new(large_bmp(1200, 1000), "image/bmp", "photo.bmp");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = ingest(&doc, TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::Cancelled(_)));
        assert!(!err.is_validation());
    }
}
