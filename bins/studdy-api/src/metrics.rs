// Prometheus metrics for the API

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use studdy_common::error::AppResult;
use tracing::error;

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "studdy_requests_total",
        "Operations handled, by operation and outcome code",
        &["operation", "outcome"]
    )
    .expect("studdy_requests_total registers once");
}

/// Count one finished operation; failures are labelled with their error code
pub fn record<T>(operation: &str, result: &AppResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind.as_str(),
    };
    REQUESTS_TOTAL.with_label_values(&[operation, outcome]).inc();
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    let mut buffer = Vec::new();
    let families = prometheus::gather();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        buffer,
    )
        .into_response()
}
