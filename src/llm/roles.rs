//! Role-scoped LM wrappers.
//!
//! The pipeline uses five logical LM roles. Each role wraps a physical model
//! (possibly shared) and keeps its own resettable usage counter and call log;
//! counter writes are serialized behind a mutex because role LMs are shared
//! across worker threads.

use std::sync::{Arc, Mutex};

use super::resilience::{complete_with_retry, RetryPolicy};
use super::types::{GenerateOptions, LanguageModel, LmCallRecord, LmResponse, LmUsage};
use super::LmError;
use crate::workers::SafeMode;

/// A role-bound LM with usage accounting and retry built in.
pub struct RoleLm {
    role: String,
    inner: Arc<dyn LanguageModel>,
    default_max_tokens: u32,
    usage: Mutex<LmUsage>,
    history: Mutex<Vec<LmCallRecord>>,
    policy: Arc<RetryPolicy>,
    safe_mode: SafeMode,
}

impl RoleLm {
    pub fn new(
        role: &str,
        inner: Arc<dyn LanguageModel>,
        default_max_tokens: u32,
        policy: Arc<RetryPolicy>,
        safe_mode: SafeMode,
    ) -> Self {
        Self {
            role: role.to_string(),
            inner,
            default_max_tokens,
            usage: Mutex::new(LmUsage::default()),
            history: Mutex::new(Vec::new()),
            policy,
            safe_mode,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    /// Complete with the role's default output budget.
    pub fn complete(&self, prompt: &str) -> Result<String, LmError> {
        self.complete_with(prompt, &GenerateOptions::with_max_tokens(self.default_max_tokens))
    }

    pub fn complete_with(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LmError> {
        let LmResponse { text, usage } =
            complete_with_retry(self.inner.as_ref(), prompt, opts, &self.policy, &self.safe_mode)?;

        self.usage.lock().expect("usage lock poisoned").add(usage);
        self.history
            .lock()
            .expect("history lock poisoned")
            .push(LmCallRecord {
                role: self.role.clone(),
                prompt: prompt.to_string(),
                response: text.clone(),
                usage,
                timestamp: chrono::Utc::now(),
            });

        Ok(text)
    }

    pub fn usage(&self) -> LmUsage {
        *self.usage.lock().expect("usage lock poisoned")
    }

    /// Snapshot the counter and zero it, e.g. at stage boundaries.
    pub fn usage_and_reset(&self) -> LmUsage {
        let mut guard = self.usage.lock().expect("usage lock poisoned");
        std::mem::take(&mut *guard)
    }

    /// Drain the call log.
    pub fn history_and_reset(&self) -> Vec<LmCallRecord> {
        let mut guard = self.history.lock().expect("history lock poisoned");
        std::mem::take(&mut *guard)
    }
}

/// The five pipeline roles with their recommended output budgets.
pub struct LmConfigs {
    pub conv_simulator_lm: Arc<RoleLm>,
    pub question_asker_lm: Arc<RoleLm>,
    pub outline_gen_lm: Arc<RoleLm>,
    pub article_gen_lm: Arc<RoleLm>,
    pub article_polish_lm: Arc<RoleLm>,
    policy: Arc<RetryPolicy>,
}

impl LmConfigs {
    /// Bind each role to its own physical model.
    pub fn new(
        conv_simulator: Arc<dyn LanguageModel>,
        question_asker: Arc<dyn LanguageModel>,
        outline_gen: Arc<dyn LanguageModel>,
        article_gen: Arc<dyn LanguageModel>,
        article_polish: Arc<dyn LanguageModel>,
    ) -> Self {
        let policy = Arc::new(RetryPolicy::new());
        let safe_mode = SafeMode::new();

        Self {
            conv_simulator_lm: Arc::new(RoleLm::new(
                "conv_simulator",
                conv_simulator,
                500,
                policy.clone(),
                safe_mode.clone(),
            )),
            question_asker_lm: Arc::new(RoleLm::new(
                "question_asker",
                question_asker,
                500,
                policy.clone(),
                safe_mode.clone(),
            )),
            outline_gen_lm: Arc::new(RoleLm::new(
                "outline_gen",
                outline_gen,
                400,
                policy.clone(),
                safe_mode.clone(),
            )),
            article_gen_lm: Arc::new(RoleLm::new(
                "article_gen",
                article_gen,
                700,
                policy.clone(),
                safe_mode.clone(),
            )),
            article_polish_lm: Arc::new(RoleLm::new(
                "article_polish",
                article_polish,
                4000,
                policy.clone(),
                safe_mode,
            )),
            policy,
        }
    }

    /// Bind all five roles to one shared physical model.
    pub fn shared(lm: Arc<dyn LanguageModel>) -> Self {
        Self::new(lm.clone(), lm.clone(), lm.clone(), lm.clone(), lm)
    }

    pub fn safe_mode(&self) -> SafeMode {
        // All roles share one flag; any of them can report it.
        self.conv_simulator_lm.safe_mode.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn roles(&self) -> [&RoleLm; 5] {
        [
            &self.conv_simulator_lm,
            &self.question_asker_lm,
            &self.outline_gen_lm,
            &self.article_gen_lm,
            &self.article_polish_lm,
        ]
    }

    /// Per-role usage snapshot, counters reset.
    pub fn collect_and_reset_usage(&self) -> Vec<(String, LmUsage)> {
        self.roles()
            .iter()
            .map(|r| (r.role().to_string(), r.usage_and_reset()))
            .collect()
    }

    /// Full call history across roles, logs reset.
    pub fn collect_and_reset_history(&self) -> Vec<LmCallRecord> {
        let mut all: Vec<LmCallRecord> = self
            .roles()
            .iter()
            .flat_map(|r| r.history_and_reset())
            .collect();
        all.sort_by_key(|rec| rec.timestamp);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLm;

    fn configs() -> LmConfigs {
        LmConfigs::shared(Arc::new(MockLm::single("hello")))
    }

    #[test]
    fn role_completion_tracks_usage() {
        let cfg = configs();
        let out = cfg.question_asker_lm.complete("what is this?").unwrap();
        assert_eq!(out, "hello");

        let usage = cfg.question_asker_lm.usage();
        assert!(usage.completion_tokens > 0);
        // Other roles untouched.
        assert_eq!(cfg.outline_gen_lm.usage(), LmUsage::default());
    }

    #[test]
    fn usage_reset_zeroes_counter() {
        let cfg = configs();
        cfg.article_gen_lm.complete("draft").unwrap();
        let first = cfg.article_gen_lm.usage_and_reset();
        assert!(first.completion_tokens > 0);
        assert_eq!(cfg.article_gen_lm.usage(), LmUsage::default());
    }

    #[test]
    fn history_records_role_and_prompt() {
        let cfg = configs();
        cfg.conv_simulator_lm.complete("expand this question").unwrap();
        cfg.outline_gen_lm.complete("outline this").unwrap();

        let history = cfg.collect_and_reset_history();
        assert_eq!(history.len(), 2);
        let roles: Vec<&str> = history.iter().map(|r| r.role.as_str()).collect();
        assert!(roles.contains(&"conv_simulator"));
        assert!(roles.contains(&"outline_gen"));
        // Drained.
        assert!(cfg.collect_and_reset_history().is_empty());
    }

    #[test]
    fn collect_usage_covers_all_five_roles() {
        let cfg = configs();
        let snapshot = cfg.collect_and_reset_usage();
        let names: Vec<&str> = snapshot.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "conv_simulator",
                "question_asker",
                "outline_gen",
                "article_gen",
                "article_polish"
            ]
        );
    }
}
