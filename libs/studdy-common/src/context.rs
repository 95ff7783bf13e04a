use serde_json::{Map, Value};
use tracing::Span;
use uuid::Uuid;

/// Fields whose values never reach the logs
const PII_FIELDS: &[&str] = &["email", "displayName", "password", "token"];

/// Identity of one inbound action, threaded through every call it makes.
///
/// Each invocation owns its own context, so concurrent actions never share
/// logging state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: String,
    pub operation: &'static str,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, operation: &'static str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            operation,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Span that every event of this action is recorded under
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            user_id = %self.user_id,
            operation = self.operation,
        )
    }
}

/// Mask PII fields in log metadata, recursing into nested objects
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let masked: Map<String, Value> = map
                .iter()
                .map(|(key, v)| {
                    if PII_FIELDS.contains(&key.as_str()) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact(v))
                    }
                })
                .collect();
            Value::Object(masked)
        }
        other => other.clone(),
    }
}
