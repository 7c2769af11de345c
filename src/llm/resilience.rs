//! Retry wrapper for LM calls: exponential backoff with a rate-limit
//! carve-out (429s wait as long as the budget allows, they never fail the
//! call early) and a safe-mode trip wire after repeated 429s.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::types::{GenerateOptions, LanguageModel, LmResponse};
use super::LmError;
use crate::workers::SafeMode;

/// First retry delay. Doubles each attempt.
const BASE_DELAY: Duration = Duration::from_secs(10);
/// Cap on any single delay, and on the total backoff budget.
const MAX_DELAY: Duration = Duration::from_secs(300);
/// Minimum attempts before a non-rate-limit error is allowed to fail the call.
const MIN_ATTEMPTS: u32 = 5;
/// Consecutive rate-limit errors before the pools degrade to 1 worker.
const SAFE_MODE_THRESHOLD: u32 = 3;

/// Per-run retry state shared by all roles.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    consecutive_rate_limits: AtomicU32,
    total_retries: AtomicU32,
    total_rate_limits: AtomicU32,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_retries(&self) -> u32 {
        self.total_retries.load(Ordering::SeqCst)
    }

    pub fn total_rate_limits(&self) -> u32 {
        self.total_rate_limits.load(Ordering::SeqCst)
    }

    fn record_rate_limit(&self, safe_mode: &SafeMode) {
        self.total_rate_limits.fetch_add(1, Ordering::SeqCst);
        let streak = self.consecutive_rate_limits.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= SAFE_MODE_THRESHOLD {
            safe_mode.engage();
        }
    }

    fn record_success(&self) {
        self.consecutive_rate_limits.store(0, Ordering::SeqCst);
    }
}

/// Call `lm` with retries.
///
/// Backoff schedule: 10s, 20s, 40s, 80s, … capped at 300s per wait and
/// bounded by a 300s cumulative budget for non-rate-limit errors. Rate
/// limits keep retrying past the attempt floor; giving up on a 429 would
/// abandon a run that only needed patience.
pub fn complete_with_retry(
    lm: &dyn LanguageModel,
    prompt: &str,
    opts: &GenerateOptions,
    policy: &RetryPolicy,
    safe_mode: &SafeMode,
) -> Result<LmResponse, LmError> {
    let mut attempt: u32 = 0;
    let mut waited = Duration::ZERO;

    loop {
        attempt += 1;
        match lm.complete(prompt, opts) {
            Ok(response) => {
                policy.record_success();
                return Ok(response);
            }
            Err(err) => {
                let rate_limited = err.is_rate_limit();
                if rate_limited {
                    policy.record_rate_limit(safe_mode);
                }

                if !err.is_retryable() {
                    return Err(err);
                }

                let exhausted_budget = waited >= MAX_DELAY && attempt >= MIN_ATTEMPTS;
                if exhausted_budget && !rate_limited {
                    tracing::error!(
                        model = lm.model_name(),
                        attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                policy.total_retries.fetch_add(1, Ordering::SeqCst);
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    model = lm.model_name(),
                    attempt,
                    delay_secs = delay.as_secs(),
                    rate_limited,
                    error = %err,
                    "LM call failed, backing off"
                );
                std::thread::sleep(delay);
                waited += delay;
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(5);
    let delay = BASE_DELAY * 2u32.pow(exp);
    delay.min(MAX_DELAY)
}
