//! LLM content generation.
//!
//! The model is treated as unreliable: calls are retried under a
//! [`RetryPolicy`], and replies that are supposed to be JSON may arrive
//! fenced in a markdown code block or not parse at all.

use crate::config::LlmConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// One completion for a system and user instruction
    async fn generate(&self, system: &str, user: &str, max_tokens: u32) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Messages-API client
pub struct AnthropicGenerator {
    http: reqwest::Client,
    config: LlmConfig,
}

impl AnthropicGenerator {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .with_context(|| "failed to build HTTP client")?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ContentGenerator for AnthropicGenerator {
    async fn generate(&self, system: &str, user: &str, max_tokens: u32) -> anyhow::Result<String> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let response: MessagesResponse = self
            .http
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| anyhow::anyhow!("model reply contained no text block"))
    }
}

/// Strip an optional ```` ```json ```` fence and surrounding whitespace
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = if rest.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            &rest[4..]
        } else {
            rest
        };
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text.trim()
}

pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> serde_json::Result<T> {
    serde_json::from_str(strip_code_fence(raw))
}

/// Ask the model for JSON.
///
/// Transport failures are retried under `policy`; exhaustion is
/// `AI_SERVICE_UNAVAILABLE`. A reply that does not parse is reported as
/// `on_malformed`, chosen by the caller.
pub async fn generate_json<T: DeserializeOwned>(
    generator: &dyn ContentGenerator,
    policy: &RetryPolicy,
    system: &str,
    user: &str,
    max_tokens: u32,
    on_malformed: ErrorKind,
) -> AppResult<T> {
    let start = std::time::Instant::now();
    let raw = policy
        .run(|_| generator.generate(system, user, max_tokens))
        .await
        .map_err(|e| {
            error!(error = %e, attempts = policy.max_attempts, "Model exhausted retries");
            AppError::new(
                ErrorKind::AiServiceUnavailable,
                format!("model unavailable after {} attempts: {:#}", policy.max_attempts, e),
            )
        })?;

    info!(
        duration_ms = start.elapsed().as_millis() as u64,
        input_len = user.len(),
        output_len = raw.len(),
        "Model invocation succeeded"
    );

    parse_model_json(&raw).map_err(|e| {
        AppError::new(on_malformed, format!("model returned malformed JSON: {}", e)).with_source(e)
    })
}
