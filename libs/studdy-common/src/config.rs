// Application configuration, read from the environment

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::judge::PollPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend '{}' (expected redis or memory)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_host: String,
    pub poll: PollPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub judge: JudgeConfig,
    /// `None` disables AI feedback
    pub llm: Option<LlmConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests need not touch the
    /// process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let poll_interval_ms: u64 = var("JUDGE0_POLL_INTERVAL_MS", "500")
            .parse()
            .context("JUDGE0_POLL_INTERVAL_MS must be an integer")?;
        let max_poll_attempts: u32 = var("JUDGE0_MAX_POLL_ATTEMPTS", "20")
            .parse()
            .context("JUDGE0_MAX_POLL_ATTEMPTS must be an integer")?;

        let llm = lookup("LLM_API_KEY")
            .filter(|key| !key.is_empty())
            .map(|api_key| LlmConfig {
                api_url: var("LLM_API_URL", "https://api.anthropic.com/v1/messages"),
                api_key,
                model: var("LLM_MODEL", "claude-3-sonnet-20240229"),
            });

        Ok(Self {
            bind_addr: var("BIND_ADDR", "0.0.0.0:3000"),
            store_backend: var("STORE_BACKEND", "redis").parse()?,
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            judge: JudgeConfig {
                base_url: var("JUDGE0_API_URL", "https://judge0-ce.p.rapidapi.com"),
                api_key: var("JUDGE0_API_KEY", ""),
                api_host: var("JUDGE0_API_HOST", "judge0-ce.p.rapidapi.com"),
                poll: PollPolicy {
                    interval: Duration::from_millis(poll_interval_ms),
                    max_attempts: max_poll_attempts,
                },
            },
            llm,
        })
    }
}
