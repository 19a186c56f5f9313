//! Aggregator: merges stage outputs into one object and scores it.
//!
//! Pure functions. The same inputs always serialize to the same bytes.

use serde_json::{json, Map, Value};

use super::types::{EnhancementOutcome, ExtractionRequirement, OcrOutcome};

pub const VISION_WEIGHT: f64 = 0.6;
pub const OCR_WEIGHT: f64 = 0.3;
pub const ENHANCEMENT_WEIGHT: f64 = 0.1;
/// Fixed stability credit for a completed enhancement pass.
pub const ENHANCEMENT_SCORE: f64 = 0.8;
/// Reported when no stage produced a usable confidence.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;
/// Vision confidence credited to the OCR-only fallback, per unit of OCR confidence.
pub const DEGRADED_VISION_FACTOR: f64 = 0.5;

/// Seed used when no vision provider produced a result.
pub fn degraded_seed(ocr: &OcrOutcome) -> (Map<String, Value>, f64) {
    let mut data = Map::new();
    data.insert("extractedText".into(), Value::String(ocr.text.clone()));
    (data, ocr.normalized_confidence() * DEGRADED_VISION_FACTOR)
}

/// Overlay enhancement features onto the vision data.
///
/// `entities` and `keywords` always overwrite; `summary` only when non-empty.
pub fn combine(
    vision_data: &Map<String, Value>,
    enhancement: Option<&EnhancementOutcome>,
) -> Map<String, Value> {
    let mut merged = vision_data.clone();
    let Some(enhancement) = enhancement else {
        return merged;
    };

    let entities = enhancement
        .entities
        .iter()
        .map(|e| json!({"text": e.text, "label": e.label, "confidence": e.confidence}))
        .collect();
    merged.insert("entities".into(), Value::Array(entities));

    let keywords = enhancement
        .keywords
        .iter()
        .map(|k| Value::String(k.clone()))
        .collect();
    merged.insert("keywords".into(), Value::Array(keywords));

    if !enhancement.summary.is_empty() {
        merged.insert("summary".into(), Value::String(enhancement.summary.clone()));
    }

    merged
}

/// Weighted confidence over the stages that produced a signal.
///
/// Both inputs are on the 0-1 scale (see `OcrOutcome::normalized_confidence`).
/// Zero or missing inputs drop out of both numerator and denominator.
pub fn confidence(vision: Option<f64>, ocr: Option<f64>, enhancement_present: bool) -> f64 {
    let mut total = 0.0;
    let mut weights = 0.0;

    if let Some(v) = vision.filter(|v| *v != 0.0 && v.is_finite()) {
        total += v * VISION_WEIGHT;
        weights += VISION_WEIGHT;
    }

    if let Some(o) = ocr.filter(|o| *o != 0.0 && o.is_finite()) {
        total += o * OCR_WEIGHT;
        weights += OCR_WEIGHT;
    }

    if enhancement_present {
        total += ENHANCEMENT_SCORE * ENHANCEMENT_WEIGHT;
        weights += ENHANCEMENT_WEIGHT;
    }

    if weights > 0.0 {
        (total / weights).clamp(0.0, 1.0)
    } else {
        NEUTRAL_CONFIDENCE
    }
}

/// Warn when the final confidence misses the caller's threshold.
/// The threshold is advisory; the result is returned regardless.
pub fn check_threshold(confidence: f64, requirement: Option<&ExtractionRequirement>) -> bool {
    let Some(threshold) = requirement.and_then(|r| r.confidence_threshold) else {
        return true;
    };
    let met = confidence >= threshold;
    if !met {
        tracing::warn!(confidence, threshold, "Extraction confidence below requested threshold");
    }
    met
}
