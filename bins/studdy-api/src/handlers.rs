// HTTP route handlers for the StuddyBuddy API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use studdy_common::context::RequestContext;
use studdy_common::envelope::Reply;
use studdy_common::error::{AppError, AppResult};
use studdy_common::gamification::XpAward;
use studdy_common::service::{EvaluateRequest, EvaluationReport, ProgressReport};
use studdy_common::srs::ReviewSchedule;
use studdy_common::types::{ActionKind, ExecutionResult, ReviewState};

use crate::metrics;
use crate::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Envelope body sent with its mapped status and `Cache-Control: no-store`
pub struct EnvelopeResponse<T>(pub Reply<T>);

impl<T: Serialize> IntoResponse for EnvelopeResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.0.body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

fn respond<T>(operation: &'static str, result: AppResult<T>) -> EnvelopeResponse<T> {
    metrics::record(operation, &result);
    EnvelopeResponse(Reply::from_result(result))
}

fn context(headers: &HeaderMap, user_id: impl Into<String>, operation: &'static str) -> RequestContext {
    let ctx = RequestContext::new(user_id, operation);
    match headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => ctx.with_request_id(id),
        _ => ctx,
    }
}

fn invalid_body(rejection: JsonRejection) -> AppError {
    AppError::invalid_input(format!("malformed request body: {}", rejection.body_text()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    pub user_id: String,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub user_id: String,
    #[serde(flatten)]
    pub request: EvaluateRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateXpBody {
    pub user_id: String,
    pub action: ActionKind,
    pub points: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardSessionBody {
    pub user_id: String,
    pub total_cards: u32,
    pub correct_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySessionBody {
    pub user_id: String,
    pub duration_minutes: u32,
    #[serde(default = "default_accepted")]
    pub accepted: bool,
}

fn default_accepted() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBody {
    pub user_id: String,
    pub concept_id: String,
    pub quality: u8,
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /execute - Run code once through the judge
pub async fn execute(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ExecuteBody>, JsonRejection>,
) -> EnvelopeResponse<ExecutionResult> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "executeCode");
            state
                .service
                .execute(&ctx, &body.source_code, &body.language, body.stdin.as_deref())
                .await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("executeCode", result)
}

/// POST /evaluate - Run a solution against its test cases
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EvaluateBody>, JsonRejection>,
) -> EnvelopeResponse<EvaluationReport> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "evaluateSolution");
            state.service.evaluate_solution(&ctx, body.request).await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("evaluateSolution", result)
}

/// POST /xp - Award XP for an action
pub async fn update_xp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<UpdateXpBody>, JsonRejection>,
) -> EnvelopeResponse<XpAward> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "updateXP");
            state
                .service
                .update_xp(&ctx, body.action, body.points, body.metadata)
                .await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("updateXP", result)
}

/// POST /flashcards/sessions
pub async fn flashcard_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<FlashcardSessionBody>, JsonRejection>,
) -> EnvelopeResponse<XpAward> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "saveFlashcardSession");
            state
                .service
                .record_flashcard_session(&ctx, body.total_cards, body.correct_count)
                .await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("saveFlashcardSession", result)
}

/// POST /study-sessions
pub async fn study_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<StudySessionBody>, JsonRejection>,
) -> EnvelopeResponse<XpAward> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "completeStudySession");
            state
                .service
                .record_study_session(&ctx, body.duration_minutes, body.accepted)
                .await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("completeStudySession", result)
}

/// POST /reviews - Record a recall and reschedule the concept
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ReviewBody>, JsonRejection>,
) -> EnvelopeResponse<ReviewState> {
    let result = match payload {
        Ok(Json(body)) => {
            let ctx = context(&headers, body.user_id, "submitReview");
            state
                .service
                .submit_review(&ctx, &body.concept_id, body.quality)
                .await
        }
        Err(rejection) => Err(invalid_body(rejection)),
    };
    respond("submitReview", result)
}

/// GET /reviews/{user_id}
pub async fn scheduled_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> EnvelopeResponse<ReviewSchedule> {
    let ctx = context(&headers, user_id, "getScheduledReviews");
    let result = state.service.scheduled_reviews(&ctx).await;
    respond("getScheduledReviews", result)
}

/// GET /progress/{user_id}
pub async fn user_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> EnvelopeResponse<ProgressReport> {
    let ctx = context(&headers, user_id, "getUserProgress");
    let result = state.service.user_progress(&ctx).await;
    respond("getUserProgress", result)
}
