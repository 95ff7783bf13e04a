//! Error taxonomy shared by every operation.
//!
//! Each failure carries exactly one [`ErrorKind`]. The kind fixes the HTTP
//! status, whether the caller may retry, and the message shown to end users.
//! The diagnostic `message` on [`AppError`] is for logs; it reaches the
//! caller only for client-input failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedLanguage,
    Unauthorized,
    NoExercisesAvailable,
    UserNotFound,
    QuizAlreadyCompleted,
    InsufficientProficiency,
    RateLimitExceeded,
    DatabaseError,
    CodeExecutionError,
    AiServiceUnavailable,
    DatabaseThrottled,
    CodeExecutionTimeout,
}

/// Coarse grouping used for logging and message disclosure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTier {
    /// 4xx: the caller sent something wrong
    ClientInput,
    /// 503: safe to retry after a backoff
    Transient,
    /// 500/502/504: logged in full, surfaced generically
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::InvalidInput,
        ErrorKind::UnsupportedLanguage,
        ErrorKind::Unauthorized,
        ErrorKind::NoExercisesAvailable,
        ErrorKind::UserNotFound,
        ErrorKind::QuizAlreadyCompleted,
        ErrorKind::InsufficientProficiency,
        ErrorKind::RateLimitExceeded,
        ErrorKind::DatabaseError,
        ErrorKind::CodeExecutionError,
        ErrorKind::AiServiceUnavailable,
        ErrorKind::DatabaseThrottled,
        ErrorKind::CodeExecutionTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::UnsupportedLanguage => "UNSUPPORTED_LANGUAGE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::NoExercisesAvailable => "NO_EXERCISES_AVAILABLE",
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::QuizAlreadyCompleted => "QUIZ_ALREADY_COMPLETED",
            ErrorKind::InsufficientProficiency => "INSUFFICIENT_PROFICIENCY",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::CodeExecutionError => "CODE_EXECUTION_ERROR",
            ErrorKind::AiServiceUnavailable => "AI_SERVICE_UNAVAILABLE",
            ErrorKind::DatabaseThrottled => "DATABASE_THROTTLED",
            ErrorKind::CodeExecutionTimeout => "CODE_EXECUTION_TIMEOUT",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::UnsupportedLanguage => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NoExercisesAvailable | ErrorKind::UserNotFound => 404,
            ErrorKind::QuizAlreadyCompleted => 409,
            ErrorKind::InsufficientProficiency => 422,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::DatabaseError => 500,
            ErrorKind::CodeExecutionError => 502,
            ErrorKind::AiServiceUnavailable | ErrorKind::DatabaseThrottled => 503,
            ErrorKind::CodeExecutionTimeout => 504,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::AiServiceUnavailable | ErrorKind::DatabaseThrottled
        )
    }

    pub fn tier(&self) -> ErrorTier {
        match self.status_code() {
            400..=499 => ErrorTier::ClientInput,
            _ if self.is_retryable() => ErrorTier::Transient,
            _ => ErrorTier::Internal,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "The request data was invalid. Please check your input.",
            ErrorKind::UnsupportedLanguage => {
                "The programming language you selected is not supported."
            }
            ErrorKind::Unauthorized => "You are not authorized to perform this action.",
            ErrorKind::NoExercisesAvailable => {
                "No exercises are available at this difficulty level."
            }
            ErrorKind::UserNotFound => "User profile not found.",
            ErrorKind::QuizAlreadyCompleted => "This quiz has already been completed.",
            ErrorKind::InsufficientProficiency => {
                "You need a higher proficiency level for this content."
            }
            ErrorKind::RateLimitExceeded => "Too many requests. Please wait a moment and try again.",
            ErrorKind::DatabaseError => "A database error occurred. Please try again.",
            ErrorKind::CodeExecutionError => "Code execution failed. Please check your code.",
            ErrorKind::AiServiceUnavailable => {
                "The AI service is temporarily unavailable. Please try again shortly."
            }
            ErrorKind::DatabaseThrottled => "The service is under high load. Please retry in a moment.",
            ErrorKind::CodeExecutionTimeout => {
                "Your code took too long to execute. Please optimize and try again."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub suggestions: Vec<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestions: Vec::new(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn unsupported_language(language: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedLanguage,
            format!("Unsupported language: {}", language),
        )
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, message)
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Unclassified failures land in the most conservative unrecoverable bucket
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::new(ErrorKind::DatabaseError, format!("{:#}", err))
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
