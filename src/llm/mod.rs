pub mod client;
pub mod resilience;
pub mod roles;
pub mod types;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LmError {
    #[error("LM endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("LM request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("LM API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse LM response: {0}")]
    ResponseParsing(String),

    #[error("missing API key for {0}")]
    MissingApiKey(String),
}

impl LmError {
    /// Rate limits are never fatal: the retry loop keeps waiting them out.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LmError::RateLimited(_))
            || matches!(self, LmError::Api { status: 429, .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LmError::Unreachable(_) | LmError::Timeout(_) | LmError::RateLimited(_) => true,
            LmError::Api { status, .. } => *status == 429 || *status >= 500,
            LmError::ResponseParsing(_) | LmError::MissingApiKey(_) => false,
        }
    }
}
