//! Response envelope: every operation resolves to exactly one of
//! `{"success": true, "data": ...}` or `{"success": false, "error": {...}}`.

use crate::error::{AppError, ErrorKind, ErrorTier};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub retryable: bool,
}

impl ErrorResponse {
    /// Build the caller-facing error. Internal failures never expose their
    /// diagnostic message.
    pub fn from_error(err: &AppError) -> Self {
        let user_message = err.kind.user_message().to_string();
        let message = match err.kind.tier() {
            ErrorTier::Internal => user_message.clone(),
            ErrorTier::ClientInput | ErrorTier::Transient => err.message.clone(),
        };

        Self {
            code: err.kind,
            message,
            user_message,
            suggestions: err.suggestions.clone(),
            retryable: err.kind.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Envelope<T> {
    Success { success: bool, data: T },
    Failure { success: bool, error: ErrorResponse },
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope::Success {
            success: true,
            data,
        }
    }

    pub fn failure(err: &AppError) -> Self {
        Envelope::Failure {
            success: false,
            error: ErrorResponse::from_error(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }
}

/// An envelope paired with the HTTP-equivalent status it should be sent with
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub status: u16,
    pub body: Envelope<T>,
}

impl<T> Reply<T> {
    /// Resolve an operation outcome. Failures are logged here, once, with
    /// their full diagnostic.
    pub fn from_result(result: Result<T, AppError>) -> Self {
        Self::from_result_with_status(result, 200)
    }

    pub fn from_result_with_status(result: Result<T, AppError>, success_status: u16) -> Self {
        match result {
            Ok(data) => Reply {
                status: success_status,
                body: Envelope::success(data),
            },
            Err(err) => {
                match err.kind.tier() {
                    ErrorTier::Internal => error!(
                        code = %err.kind,
                        error = %err,
                        source = ?err.source,
                        "Operation failed"
                    ),
                    ErrorTier::Transient | ErrorTier::ClientInput => warn!(
                        code = %err.kind,
                        error = %err,
                        "Operation rejected"
                    ),
                }
                Reply {
                    status: err.status_code(),
                    body: Envelope::failure(&err),
                }
            }
        }
    }
}
