use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ──────────────────────────────────────────────
// Request side
// ──────────────────────────────────────────────

/// An uploaded document. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Document {
    bytes: Vec<u8>,
    media_type: String,
    name: String,
}

impl Document {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
            name: name.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// `data:<media>;base64,<payload>` form used by chat-style vision APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }

    pub fn base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

// Bytes are never printed: documents may carry personal data.
impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Export formats the caller wants downstream. Carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Xml,
    Csv,
}

/// Caller-side extraction schema pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequirement {
    pub document_type: String,
    #[serde(default)]
    pub output_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default)]
    pub preserve_structure: bool,
}

impl ExtractionRequirement {
    pub fn for_type(document_type: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
            output_formats: vec![OutputFormat::Json],
            confidence_threshold: None,
            include_metadata: false,
            preserve_structure: false,
        }
    }

    /// The requested type, if one was actually named.
    pub fn requested_type(&self) -> Option<&str> {
        let trimmed = self.document_type.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub document: Document,
    pub query: String,
    pub requirement: Option<ExtractionRequirement>,
}

impl ExtractionRequest {
    pub fn new(document: Document, query: impl Into<String>) -> Self {
        Self {
            document,
            query: query.into(),
            requirement: None,
        }
    }

    pub fn with_requirement(mut self, requirement: ExtractionRequirement) -> Self {
        self.requirement = Some(requirement);
        self
    }
}

// ──────────────────────────────────────────────
// Document type vocabulary
// ──────────────────────────────────────────────

/// Document-type label steering the vision prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentType {
    LegalContract,
    FinancialInvoice,
    MedicalRecord,
    TechnicalSpecification,
    General,
    /// Caller-supplied id outside the built-in vocabulary, kept verbatim.
    Other(String),
}

impl DocumentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LegalContract => "legal-contract",
            Self::FinancialInvoice => "financial-invoice",
            Self::MedicalRecord => "medical-record",
            Self::TechnicalSpecification => "technical-specification",
            Self::General => "general",
            Self::Other(id) => id,
        }
    }

    /// Parse a template id. Unknown ids are preserved, never rejected.
    pub fn from_id(id: &str) -> Self {
        match id {
            "legal-contract" => Self::LegalContract,
            "financial-invoice" => Self::FinancialInvoice,
            "medical-record" => Self::MedicalRecord,
            "technical-specification" => Self::TechnicalSpecification,
            "general" => Self::General,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DocumentType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Ok(Self::from_id(&id))
    }
}

// ──────────────────────────────────────────────
// Stage outcomes
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub label: DocumentType,
    /// Set only when a remote classifier actually answered.
    pub model_used: Option<&'static str>,
}

/// Word-level OCR box in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Engine confidence, 0-100.
    pub confidence: f32,
}

/// Local OCR result. Confidence stays on the engine's native 0-100 scale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrOutcome {
    pub text: String,
    pub confidence: f64,
    pub word_boxes: Vec<WordBox>,
}

impl OcrOutcome {
    /// Substitute used when the OCR stage fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Confidence on the pipeline's 0-1 scale.
    pub fn normalized_confidence(&self) -> f64 {
        (self.confidence / 100.0).clamp(0.0, 1.0)
    }
}

/// What the vision model gave back.
#[derive(Debug, Clone, PartialEq)]
pub enum VisionPayload {
    /// A JSON object was found and decoded.
    Structured(Map<String, Value>),
    /// No decodable object; the raw text is kept.
    Unstructured { raw: String },
}

impl VisionPayload {
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Object form handed to the Aggregator.
    pub fn to_data(&self) -> Map<String, Value> {
        match self {
            Self::Structured(map) => map.clone(),
            Self::Unstructured { raw } => {
                let mut map = Map::new();
                map.insert("rawResponse".into(), Value::String(raw.clone()));
                map.insert("extractedText".into(), Value::String(raw.clone()));
                map
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionOutcome {
    pub payload: VisionPayload,
    /// 0-1.
    pub confidence: f64,
    pub provider_used: String,
}

/// Named entity from the NER provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnhancementOutcome {
    pub entities: Vec<Entity>,
    pub keywords: Vec<String>,
    pub summary: String,
    /// Capabilities that actually produced output, in call order.
    pub models: Vec<&'static str>,
}

// ──────────────────────────────────────────────
// Progress & result
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Idle,
    Uploading,
    Analyzing,
    Extracting,
    Structuring,
    Completed,
    Error,
}

impl ProcessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Analyzing => "analyzing",
            Self::Extracting => "extracting",
            Self::Structuring => "structuring",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One advisory progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub step: ProcessingStep,
    pub percent: u8,
}

/// Terminal value of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub request_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub models_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
