//! Extraction prompt sent to every vision provider.

use crate::pipeline::types::DocumentType;

/// OCR text embedded in the prompt is cut to this many characters.
pub const OCR_EXCERPT_CHARS: usize = 1000;

pub fn build_prompt(query: &str, document_type: &DocumentType, ocr_text: &str) -> String {
    let ocr_excerpt = if ocr_text.is_empty() {
        "Not available".to_string()
    } else {
        let head: String = ocr_text.chars().take(OCR_EXCERPT_CHARS).collect();
        format!("{head}...")
    };

    format!(
        "You are an expert document analysis AI. Please analyze this document and extract structured information.\n\
         \n\
         Document Type: {document_type}\n\
         User Query: {query}\n\
         OCR Text (if available): {ocr_excerpt}\n\
         \n\
         Please extract information in JSON format. For document type \"{document_type}\", focus on:\n\
         - Key entities (names, dates, amounts, addresses)\n\
         - Document structure and layout\n\
         - Relevant data fields based on the document type\n\
         - Confidence in extraction accuracy\n\
         \n\
         Return ONLY valid JSON without any markdown formatting or additional text."
    )
}
