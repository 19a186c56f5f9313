//! Turns free-form model output into a `VisionPayload`.

use serde_json::Value;

use crate::pipeline::types::VisionPayload;

/// Confidence when a JSON object was decoded from the response.
pub const STRUCTURED_CONFIDENCE: f64 = 0.85;

/// Confidence when only raw text could be kept.
pub const UNSTRUCTURED_CONFIDENCE: f64 = 0.6;

/// Parse a model response. Never fails: undecodable output becomes
/// `VisionPayload::Unstructured`.
pub fn parse_response(content: &str) -> (VisionPayload, f64) {
    let decoded = find_object(content)
        .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok());

    match decoded {
        Some(Value::Object(map)) => (VisionPayload::Structured(map), STRUCTURED_CONFIDENCE),
        _ => {
            tracing::debug!(
                response_len = content.len(),
                "Vision response held no JSON object, keeping raw text"
            );
            (
                VisionPayload::Unstructured {
                    raw: content.to_string(),
                },
                UNSTRUCTURED_CONFIDENCE,
            )
        }
    }
}

/// Locate the first balanced top-level `{...}` span.
///
/// Braces inside JSON strings (including escaped quotes) are ignored.
/// Returns `None` when no opening brace exists or it is never closed.
pub fn find_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
