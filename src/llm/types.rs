use serde::{Deserialize, Serialize};

use super::LmError;

/// Per-call generation parameters.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }
}

/// Cumulative token counts for one LM instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl LmUsage {
    pub fn add(&mut self, other: LmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// One completed LM call, kept for the run's call-history artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmCallRecord {
    pub role: String,
    pub prompt: String,
    pub response: String,
    pub usage: LmUsage,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Stateless text-completion capability.
///
/// A blocked or safety-filtered response comes back as `Ok` with an empty
/// string; callers treat it as "no information", never as an error.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str, opts: &GenerateOptions) -> Result<LmResponse, LmError>;

    /// Human-readable model identifier (for logs and the run config artifact).
    fn model_name(&self) -> &str;
}

/// Completion text plus the provider-reported token usage.
#[derive(Debug, Clone, Default)]
pub struct LmResponse {
    pub text: String,
    pub usage: LmUsage,
}

impl LanguageModel for Box<dyn LanguageModel> {
    fn complete(&self, prompt: &str, opts: &GenerateOptions) -> Result<LmResponse, LmError> {
        (**self).complete(prompt, opts)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
