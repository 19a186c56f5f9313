//! Multi-stage document extraction.
//!
//! `ingest → classify → ocr → vision → enhance → aggregate`, sequenced by
//! `orchestrator::ExtractionPipeline`. Each remote capability sits behind a
//! trait with a `Mock*` implementation alongside the production one.

pub mod aggregate;
pub mod cancel;
pub mod classify;
pub mod enhance;
pub mod http;
pub mod huggingface;
pub mod ingest;
pub mod ocr;
pub mod orchestrator;
pub mod types;
pub mod vision;

pub use cancel::{CancelToken, Cancelled};
pub use orchestrator::{ExtractionPipeline, PipelineError, PipelineParts};
pub use types::{
    Document, DocumentType, ExtractionRequest, ExtractionRequirement, ProcessingResult,
    ProcessingStep, ProgressEvent,
};
