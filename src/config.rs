//! Pipeline configuration.
//!
//! One immutable `PipelineConfig` value is built by the caller (or by
//! `from_env()` in the CLI) and handed to `ExtractionPipeline::new`. Nothing in
//! the pipeline reads ambient state after construction.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "docsift";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-sonnet-20240229";

/// Values shipped in sample configs that must never be sent as credentials.
const PLACEHOLDER_KEYS: &[&str] = &[
    "your-openai-api-key-here",
    "your-anthropic-api-key-here",
    "your-huggingface-api-key-here",
];

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "docsift=info,warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

// ──────────────────────────────────────────────
// Timeouts
// ──────────────────────────────────────────────

/// Upper bounds for every suspend point in a run, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub image_decode_secs: u64,
    pub classification_secs: u64,
    pub ocr_secs: u64,
    /// Applied to each vision provider separately.
    pub vision_secs: u64,
    pub ner_secs: u64,
    pub summarization_secs: u64,
    /// Hard cap carried by the shared HTTP client.
    pub http_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image_decode_secs: 30,
            classification_secs: 30,
            ocr_secs: 60,
            vision_secs: 120,
            ner_secs: 30,
            summarization_secs: 30,
            http_request_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn image_decode(&self) -> Duration {
        Duration::from_secs(self.image_decode_secs)
    }

    pub fn classification(&self) -> Duration {
        Duration::from_secs(self.classification_secs)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_secs(self.ocr_secs)
    }

    pub fn vision(&self) -> Duration {
        Duration::from_secs(self.vision_secs)
    }

    pub fn ner(&self) -> Duration {
        Duration::from_secs(self.ner_secs)
    }

    pub fn summarization(&self) -> Duration {
        Duration::from_secs(self.summarization_secs)
    }

    pub fn http_request(&self) -> Duration {
        Duration::from_secs(self.http_request_secs)
    }
}

// ──────────────────────────────────────────────
// PipelineConfig
// ──────────────────────────────────────────────

/// Credentials, endpoints, and limits for one pipeline instance.
///
/// Deserializes from a partial document, missing fields take their defaults.
/// Credentials are never serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub huggingface_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub huggingface_base_url: String,
    pub openai_model: String,
    pub anthropic_model: String,
    /// Tesseract language code passed to `-l`.
    pub ocr_language: String,
    /// Path or name of the `tesseract` executable.
    pub tesseract_path: String,
    pub timeouts: Timeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            huggingface_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.into(),
            huggingface_base_url: DEFAULT_HUGGINGFACE_BASE_URL.into(),
            openai_model: DEFAULT_OPENAI_MODEL.into(),
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.into(),
            ocr_language: "eng".into(),
            tesseract_path: "tesseract".into(),
            timeouts: Timeouts::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a config from environment variables.
    ///
    /// `DOCSIFT_*` names win over the vendor-conventional ones
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `HF_TOKEN`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` but reads through `lookup`, so tests never touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut timeouts = Timeouts::default();
        if let Some(raw) = lookup("DOCSIFT_VISION_TIMEOUT_SECS") {
            timeouts.vision_secs = parse_secs("DOCSIFT_VISION_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DOCSIFT_HTTP_TIMEOUT_SECS") {
            timeouts.http_request_secs = parse_secs("DOCSIFT_HTTP_TIMEOUT_SECS", &raw)?;
        }

        Ok(Self {
            openai_api_key: normalize_credential(first_set(
                &lookup,
                &["DOCSIFT_OPENAI_API_KEY", "OPENAI_API_KEY"],
            )),
            anthropic_api_key: normalize_credential(first_set(
                &lookup,
                &["DOCSIFT_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"],
            )),
            huggingface_api_key: normalize_credential(first_set(
                &lookup,
                &["DOCSIFT_HUGGINGFACE_API_KEY", "HF_TOKEN"],
            )),
            openai_base_url: lookup("DOCSIFT_OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            anthropic_base_url: lookup("DOCSIFT_ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            huggingface_base_url: lookup("DOCSIFT_HUGGINGFACE_BASE_URL")
                .unwrap_or(defaults.huggingface_base_url),
            openai_model: lookup("DOCSIFT_OPENAI_MODEL").unwrap_or(defaults.openai_model),
            anthropic_model: lookup("DOCSIFT_ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            ocr_language: lookup("DOCSIFT_OCR_LANGUAGE").unwrap_or(defaults.ocr_language),
            tesseract_path: lookup("DOCSIFT_TESSERACT_PATH").unwrap_or(defaults.tesseract_path),
            timeouts,
        })
    }

    /// Usable OpenAI credential (placeholders and blanks filtered out).
    pub fn openai_key(&self) -> Option<&str> {
        usable(self.openai_api_key.as_deref())
    }

    pub fn anthropic_key(&self) -> Option<&str> {
        usable(self.anthropic_api_key.as_deref())
    }

    pub fn huggingface_key(&self) -> Option<&str> {
        usable(self.huggingface_api_key.as_deref())
    }

    /// True when at least one vision-language provider can be built.
    pub fn has_vision_credentials(&self) -> bool {
        self.openai_key().is_some() || self.anthropic_key().is_some()
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(key: Option<&str>) -> &'static str {
            if key.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("PipelineConfig")
            .field("openai_api_key", &redact(self.openai_key()))
            .field("anthropic_api_key", &redact(self.anthropic_key()))
            .field("huggingface_api_key", &redact(self.huggingface_key()))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("huggingface_base_url", &self.huggingface_base_url)
            .field("openai_model", &self.openai_model)
            .field("anthropic_model", &self.anthropic_model)
            .field("ocr_language", &self.ocr_language)
            .field("tesseract_path", &self.tesseract_path)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Trim a credential and drop it when blank or a known placeholder.
pub fn normalize_credential(raw: Option<String>) -> Option<String> {
    usable(raw.as_deref()).map(str::to_string)
}

fn usable(key: Option<&str>) -> Option<&str> {
    let key = key?.trim();
    if key.is_empty() || PLACEHOLDER_KEYS.contains(&key) {
        None
    } else {
        Some(key)
    }
}

fn first_set<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().find_map(|name| lookup(*name))
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            var: var.into(),
            reason: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(secs),
        Err(e) => Err(ConfigError::InvalidValue {
            var: var.into(),
            reason: e.to_string(),
        }),
    }
}
