//! Remote Execution Client - submit/poll against a sandboxed judge
//!
//! **Protocol:**
//! 1. Resolve the language to the judge's numeric id (no network on failure)
//! 2. Submit asynchronously (`wait=false`) and receive an opaque token
//! 3. Poll the token on a fixed cadence for a fixed number of attempts
//! 4. Normalize the first terminal result into an `ExecutionResult`
//!
//! Total latency is bounded by `poll_interval * max_attempts`. Once the
//! budget is spent the call returns `CODE_EXECUTION_TIMEOUT`; nothing keeps
//! polling in the background.
//!
//! The client does not classify outcomes: compile errors, runtime errors and
//! wrong answers are all terminal results handed back to the caller.

use crate::config::JudgeConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::types::{ExecutionRequest, ExecutionResult, Language};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Judge status ids that mean "not finished yet" (In Queue, Processing)
const PENDING_STATUS_IDS: [u32; 2] = [1, 2];
const ACCEPTED_STATUS_ID: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeStatus {
    pub id: u32,
    pub description: String,
}

/// `time` arrives as a decimal string ("0.012") or, from some judge builds,
/// as a bare number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReportedSeconds {
    Text(String),
    Number(f64),
}

impl ReportedSeconds {
    fn as_secs(&self) -> f64 {
        match self {
            ReportedSeconds::Text(s) => s.trim().parse().unwrap_or(0.0),
            ReportedSeconds::Number(n) => *n,
        }
    }
}

/// Raw submission record as returned by `GET /submissions/{token}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JudgeSubmission {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub time: Option<ReportedSeconds>,
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub status: JudgeStatus,
}

impl Default for JudgeStatus {
    fn default() -> Self {
        Self {
            id: 1,
            description: "In Queue".to_string(),
        }
    }
}

impl JudgeSubmission {
    pub fn is_pending(&self) -> bool {
        PENDING_STATUS_IDS.contains(&self.status.id)
    }

    /// Collapse a terminal record into the caller-facing shape
    pub fn into_result(self) -> ExecutionResult {
        let exit_code = self.exit_code.unwrap_or(if self.status.id == ACCEPTED_STATUS_ID {
            0
        } else {
            1
        });
        let execution_time_ms = self
            .time
            .as_ref()
            .map(|t| (t.as_secs() * 1000.0).round().max(0.0) as u64)
            .unwrap_or(0);
        let stderr = [self.stderr, self.compile_output, self.message]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or_default();

        ExecutionResult {
            stdout: self.stdout.unwrap_or_default(),
            stderr,
            exit_code,
            execution_time_ms,
            status_description: self.status.description,
        }
    }
}

/// Transport to the judge. Implementations surface any transport failure
/// as `CODE_EXECUTION_ERROR`.
#[async_trait]
pub trait JudgeTransport: Send + Sync {
    async fn submit(&self, request: &ExecutionRequest) -> AppResult<String>;
    async fn fetch(&self, token: &str) -> AppResult<JudgeSubmission>;
}

#[async_trait]
impl<T: JudgeTransport + ?Sized> JudgeTransport for Arc<T> {
    async fn submit(&self, request: &ExecutionRequest) -> AppResult<String> {
        (**self).submit(request).await
    }

    async fn fetch(&self, token: &str) -> AppResult<JudgeSubmission> {
        (**self).fetch(token).await
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    token: String,
}

/// HTTP transport for a Judge0-compatible API behind RapidAPI headers
#[derive(Debug, Clone)]
pub struct HttpJudge {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_host: String,
}

impl HttpJudge {
    pub fn new(config: &JudgeConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| execution_error("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_host: config.api_host.clone(),
        })
    }

    fn with_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.api_host)
    }
}

fn execution_error(context: &str, err: reqwest::Error) -> AppError {
    AppError::new(ErrorKind::CodeExecutionError, format!("{}: {}", context, err)).with_source(err)
}

#[async_trait]
impl JudgeTransport for HttpJudge {
    async fn submit(&self, request: &ExecutionRequest) -> AppResult<String> {
        let url = format!("{}/submissions?base64_encoded=false&wait=false", self.base_url);
        let response = self
            .with_headers(self.http.post(&url))
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| execution_error("judge submit failed", e))?;

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| execution_error("judge submit returned an unreadable body", e))?;
        Ok(body.token)
    }

    async fn fetch(&self, token: &str) -> AppResult<JudgeSubmission> {
        let url = format!("{}/submissions/{}?base64_encoded=false", self.base_url, token);
        let response = self
            .with_headers(self.http.get(&url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| execution_error("judge poll failed", e))?;

        response
            .json()
            .await
            .map_err(|e| execution_error("judge poll returned an unreadable body", e))
    }
}

/// Poll cadence and attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 20,
        }
    }
}

impl PollPolicy {
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Resolve a language name to the judge's identifier table
pub fn resolve_language(language: &str) -> AppResult<Language> {
    language.parse()
}

pub struct JudgeClient<T> {
    transport: T,
    poll: PollPolicy,
}

impl<T: JudgeTransport> JudgeClient<T> {
    pub fn new(transport: T, poll: PollPolicy) -> Self {
        Self { transport, poll }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Run `code` once with optional `stdin`
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        stdin: Option<&str>,
    ) -> AppResult<ExecutionResult> {
        let language = resolve_language(language)?;
        self.execute_resolved(code, language, stdin).await
    }

    /// Same as [`execute`](Self::execute) for an already-resolved language
    pub async fn execute_resolved(
        &self,
        code: &str,
        language: Language,
        stdin: Option<&str>,
    ) -> AppResult<ExecutionResult> {
        let start = std::time::Instant::now();
        let request = ExecutionRequest {
            source_code: code.to_string(),
            language_id: language.judge_id(),
            stdin: stdin.map(str::to_string),
        };

        info!(
            language = %language,
            language_id = request.language_id,
            code_len = code.len(),
            "Submitting code to judge"
        );
        let token = self.transport.submit(&request).await?;
        let submission = self.poll_until_terminal(&token).await?;

        info!(
            token = %token,
            status_id = submission.status.id,
            status = %submission.status.description,
            exit_code = ?submission.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Judge execution completed"
        );

        Ok(submission.into_result())
    }

    async fn poll_until_terminal(&self, token: &str) -> AppResult<JudgeSubmission> {
        for attempt in 0..self.poll.max_attempts {
            tokio::time::sleep(self.poll.interval).await;

            let submission = self.transport.fetch(token).await?;
            if !submission.is_pending() {
                return Ok(submission);
            }

            debug!(
                attempt,
                token = %token,
                status = %submission.status.description,
                "Judge still running"
            );
        }

        warn!(
            token = %token,
            attempts = self.poll.max_attempts,
            budget_ms = self.poll.budget().as_millis() as u64,
            "Judge polling budget exhausted"
        );
        Err(AppError::new(
            ErrorKind::CodeExecutionTimeout,
            format!(
                "no terminal status for submission {} after {} polls",
                token, self.poll.max_attempts
            ),
        ))
    }
}
