//! Blocking HTTP client for OpenAI-compatible chat-completion endpoints.
//!
//! Blocking stays blocking: the pipeline runs LM calls on worker threads,
//! so there is no async runtime to integrate with.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::types::{GenerateOptions, LanguageModel, LmResponse, LmUsage};
use super::LmError;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Chat-completions client with a fixed model and permissive safety settings.
///
/// Corporate/financial text trips over-eager safety filters on some
/// providers; the request always carries a `safety_settings` block that
/// permits that content, and a blocked/empty response is mapped to an empty
/// string rather than an error.
pub struct HttpLm {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpLm {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self, LmError> {
        if api_key.is_empty() {
            return Err(LmError::MissingApiKey(model.to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LmError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn with_default_timeout(base_url: &str, api_key: &str, model: &str) -> Result<Self, LmError> {
        Self::new(base_url, api_key, model, DEFAULT_TIMEOUT_SECS)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
    /// Providers without safety tiers ignore unknown fields.
    safety_settings: SafetySettings,
}

#[derive(Serialize)]
struct SafetySettings {
    harm_block_threshold: &'static str,
}

impl Default for SafetySettings {
    fn default() -> Self {
        // Filing excerpts mention layoffs, litigation, hazardous materials;
        // anything stricter than this blocks legitimate corporate content.
        Self {
            harm_block_threshold: "BLOCK_ONLY_HIGH",
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl LanguageModel for HttpLm {
    fn complete(&self, prompt: &str, opts: &GenerateOptions) -> Result<LmResponse, LmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: opts.max_tokens.max(1),
            temperature: opts.temperature,
            stop: opts.stop.iter().map(String::as_str).collect(),
            safety_settings: SafetySettings::default(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LmError::Timeout(self.timeout_secs)
                } else {
                    LmError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().unwrap_or_default();
            return Err(LmError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LmError::ResponseParsing(e.to_string()))?;

        let usage = parsed
            .usage
            .map(|u| LmUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        // Safety-blocked responses arrive with empty parts or a filter
        // finish reason. Both become "" so the caller treats them as
        // "no information" instead of failing the stage.
        let text = match parsed.choices.into_iter().next() {
            Some(choice) => {
                let blocked = choice
                    .finish_reason
                    .as_deref()
                    .is_some_and(|r| r.eq_ignore_ascii_case("content_filter") || r.eq_ignore_ascii_case("safety"));
                if blocked {
                    tracing::warn!(model = %self.model, "LM response blocked by safety filter");
                    String::new()
                } else {
                    choice.message.and_then(|m| m.content).unwrap_or_default()
                }
            }
            None => {
                tracing::warn!(model = %self.model, "LM returned no choices");
                String::new()
            }
        };

        Ok(LmResponse { text, usage })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted LM double for tests: pops responses in order, repeats the last.
///
/// Can be primed with leading errors to exercise the retry path.
pub struct MockLm {
    model: String,
    responses: Mutex<Vec<String>>,
    errors_before_success: Mutex<Vec<LmError>>,
    calls: Mutex<Vec<String>>,
}

impl MockLm {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            model: "mock-lm".to_string(),
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            errors_before_success: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn single(response: &str) -> Self {
        Self::new(vec![response])
    }

    /// Queue errors to be returned before any successful response.
    pub fn with_leading_errors(self, errors: Vec<LmError>) -> Self {
        *self.errors_before_success.lock().unwrap() = errors;
        self
    }

    /// Prompts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl LanguageModel for MockLm {
    fn complete(&self, prompt: &str, _opts: &GenerateOptions) -> Result<LmResponse, LmError> {
        self.calls.lock().unwrap().push(prompt.to_string());

        let mut errors = self.errors_before_success.lock().unwrap();
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }
        drop(errors);

        let mut responses = self.responses.lock().unwrap();
        let text = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses.first().cloned().unwrap_or_default()
        };

        Ok(LmResponse {
            text,
            usage: LmUsage {
                prompt_tokens: (prompt.len() / 4) as u64,
                completion_tokens: 32,
            },
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
