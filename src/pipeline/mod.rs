pub mod article;
pub mod curation;
#[cfg(test)]
mod scenario_tests;
pub mod orchestrator;
pub mod outline;
pub mod persona;
pub mod polish;
pub mod prompts;
pub mod types;

use thiserror::Error;

use crate::config::ConfigError;
use crate::embedding::EmbedError;
use crate::llm::LmError;
use crate::report::SinkError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("language model error: {0}")]
    Lm(#[from] LmError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{stage} produced no output: {reason}")]
    EmptyStageOutput { stage: &'static str, reason: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("report sink error: {0}")]
    Sink(#[from] SinkError),
}

impl PipelineError {
    /// Short English message for the job-status channel. Never includes a
    /// stack trace or provider payload.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Lm(_) => "language model unavailable".to_string(),
            PipelineError::Embedding(_) => "embedding service unavailable".to_string(),
            PipelineError::Config(_) => "invalid configuration".to_string(),
            PipelineError::EmptyStageOutput { stage, .. } => format!("{stage} produced no output"),
            PipelineError::Cancelled => "cancelled".to_string(),
            PipelineError::Sink(_) => "failed to persist report artifacts".to_string(),
        }
    }
}
