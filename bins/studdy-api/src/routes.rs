use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::metrics;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/execute", post(handlers::execute))
        .route("/evaluate", post(handlers::evaluate))
        .route("/xp", post(handlers::update_xp))
        .route("/flashcards/sessions", post(handlers::flashcard_session))
        .route("/study-sessions", post(handlers::study_session))
        .route("/reviews", post(handlers::submit_review))
        .route("/reviews/:user_id", get(handlers::scheduled_reviews))
        .route("/progress/:user_id", get(handlers::user_progress))
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new().merge(routes()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use studdy_common::error::{AppError, AppResult, ErrorKind};
    use studdy_common::judge::{JudgeStatus, JudgeSubmission, JudgeTransport, PollPolicy};
    use studdy_common::service::Service;
    use studdy_common::store::MemoryStore;
    use studdy_common::types::ExecutionRequest;
    use tower::util::ServiceExt;

    /// Judge that accepts everything and prints "42", or fails every poll
    struct StubJudge {
        broken: bool,
    }

    #[async_trait]
    impl JudgeTransport for StubJudge {
        async fn submit(&self, _request: &ExecutionRequest) -> AppResult<String> {
            Ok("stub-token".to_string())
        }

        async fn fetch(&self, _token: &str) -> AppResult<JudgeSubmission> {
            if self.broken {
                return Err(AppError::new(
                    ErrorKind::CodeExecutionError,
                    "judge poll failed: connection reset by 10.0.0.7",
                ));
            }
            Ok(JudgeSubmission {
                stdout: Some("42\n".to_string()),
                exit_code: Some(0),
                status: JudgeStatus {
                    id: 3,
                    description: "Accepted".to_string(),
                },
                ..Default::default()
            })
        }
    }

    fn app_with(broken: bool) -> Router {
        let poll = PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 2,
        };
        let service = Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StubJudge { broken }),
            poll,
        );
        build_app(Arc::new(AppState { service }))
    }

    fn app() -> Router {
        app_with(false)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status() {
        let response = app().oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_execute_success_envelope() {
        let response = app()
            .oneshot(post_json(
                "/execute",
                json!({"language": "python", "sourceCode": "print(42)"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["stdout"], "42\n");
        assert_eq!(body["data"]["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_client_error() {
        let (status, body) = send(
            &app(),
            post_json("/execute", json!({"language": "brainfuck", "sourceCode": "+"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNSUPPORTED_LANGUAGE");
        assert_eq!(body["error"]["message"], "Unsupported language: brainfuck");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_internal_failure_hides_diagnostics() {
        let (status, body) = send(
            &app_with(true),
            post_json("/execute", json!({"language": "go", "sourceCode": "package main"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "CODE_EXECUTION_ERROR");
        assert_eq!(body["error"]["message"], body["error"]["userMessage"]);
        assert!(!body.to_string().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_input() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/xp")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"userId\": \"u1\", \"points\": "))
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");

        let (status, body) = send(
            &app,
            post_json("/xp", json!({"userId": "u1", "action": "teleport", "points": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_xp_then_progress() {
        let app = app();

        let (status, body) = send(
            &app,
            post_json(
                "/xp",
                json!({"userId": "u1", "action": "quiz_complete", "points": 80, "metadata": {"email": "a@b.c"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["pointsAwarded"], 120);
        assert_eq!(body["data"]["newBadges"][0]["id"], "first_xp");

        let (status, body) = send(
            &app,
            post_json(
                "/flashcards/sessions",
                json!({"userId": "u1", "totalCards": 4, "correctCount": 4}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"]["totalXp"], 130);

        let (status, body) = send(&app, get("/progress/u1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalXp"], 130);
        assert_eq!(body["data"]["level"], 2);
        let mut points: Vec<u64> = body["data"]["recentActivity"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["points"].as_u64().unwrap())
            .collect();
        points.sort_unstable();
        assert_eq!(points, vec![10, 120]);
    }

    #[tokio::test]
    async fn test_review_round_trip() {
        let app = app();

        let (status, body) = send(
            &app,
            post_json("/reviews", json!({"userId": "u2", "conceptId": "iterators", "quality": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["intervalDays"], 1);

        let (status, body) = send(&app, get("/reviews/u2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dueReviews"].as_array().unwrap().len(), 0);
        assert_eq!(body["data"]["upcomingReviews"][0]["conceptId"], "iterators");

        let (status, body) = send(
            &app,
            post_json("/reviews", json!({"userId": "u2", "conceptId": "iterators", "quality": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_metrics_exposed_after_traffic() {
        let app = app();
        let _ = send(&app, post_json("/execute", json!({"language": "rust", "sourceCode": "fn main(){}"}))).await;

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("studdy_requests_total"));
        assert!(text.contains("operation=\"executeCode\""));
    }
}
