use crate::context::RequestContext;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::gamification::MAX_RAW_POINTS;
use crate::judge::{JudgeStatus, JudgeSubmission, JudgeTransport, PollPolicy, ReportedSeconds};
use crate::llm::ContentGenerator;
use crate::retry::RetryPolicy;
use crate::service::{Clock, EvaluateRequest, Service};
use crate::store::{keys, DocumentStore, Item, MemoryStore, StoreError};
use crate::types::{ActionKind, BadgeId, ExecutionRequest, TestCase};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fake judge whose "programs" upper-case their stdin.
///
/// Source containing `compile_error` fails to compile; stdin `explode`
/// makes the poll fail at the transport.
#[derive(Default)]
struct EchoJudge {
    submissions: Mutex<HashMap<String, ExecutionRequest>>,
    submit_calls: AtomicU32,
}

#[async_trait]
impl JudgeTransport for EchoJudge {
    async fn submit(&self, request: &ExecutionRequest) -> AppResult<String> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok-{}", n);
        self.submissions
            .lock()
            .unwrap()
            .insert(token.clone(), request.clone());
        Ok(token)
    }

    async fn fetch(&self, token: &str) -> AppResult<JudgeSubmission> {
        let request = self.submissions.lock().unwrap().get(token).cloned().unwrap();
        if request.source_code.contains("compile_error") {
            return Ok(JudgeSubmission {
                compile_output: Some("error: expected expression".to_string()),
                status: JudgeStatus {
                    id: 6,
                    description: "Compilation Error".to_string(),
                },
                ..Default::default()
            });
        }
        let stdin = request.stdin.unwrap_or_default();
        if stdin == "explode" {
            return Err(AppError::new(ErrorKind::CodeExecutionError, "judge poll failed: 502"));
        }
        Ok(JudgeSubmission {
            stdout: Some(format!("{}\n", stdin.to_uppercase())),
            exit_code: Some(0),
            time: Some(ReportedSeconds::Text("0.010".to_string())),
            status: JudgeStatus {
                id: 3,
                description: "Accepted".to_string(),
            },
            ..Default::default()
        })
    }
}

struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    fn advance(&self, by: ChronoDuration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Store that loses the first `conflicts` compare-and-set attempts
struct ContendedStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
    cas_calls: AtomicU32,
    history_down: AtomicBool,
}

impl ContendedStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
            cas_calls: AtomicU32::new(0),
            history_down: AtomicBool::new(false),
        }
    }

    /// Every XP history write fails at the backend
    fn without_history() -> Self {
        let store = Self::new(0);
        store.history_down.store(true, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn get(&self, partition: &str, sort_key: &str) -> Result<Option<Item>, StoreError> {
        self.inner.get(partition, sort_key).await
    }

    async fn put(&self, partition: &str, sort_key: &str, body: String) -> Result<u64, StoreError> {
        if self.history_down.load(Ordering::SeqCst) && sort_key.starts_with(keys::XP_PREFIX) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.put(partition, sort_key, body).await
    }

    async fn put_if_version(
        &self,
        partition: &str,
        sort_key: &str,
        body: String,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner
            .put_if_version(partition, sort_key, body, expected)
            .await
    }

    async fn query_prefix(
        &self,
        partition: &str,
        prefix: &str,
        limit: Option<usize>,
        descending: bool,
    ) -> Result<Vec<(String, Item)>, StoreError> {
        self.inner
            .query_prefix(partition, prefix, limit, descending)
            .await
    }
}

struct CannedModel {
    reply: Option<String>,
    calls: AtomicU32,
}

#[async_trait]
impl ContentGenerator for CannedModel {
    async fn generate(&self, _system: &str, user: &str, _max: u32) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(user.contains("<user_solution>"));
        self.reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model endpoint returned 503"))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
}

fn fast_poll() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(10),
        max_attempts: 3,
    }
}

struct Harness {
    service: Arc<Service>,
    store: Arc<MemoryStore>,
    judge: Arc<EchoJudge>,
    clock: Arc<FixedClock>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let judge = Arc::new(EchoJudge::default());
    let clock = FixedClock::at(start());
    let service = Service::new(store.clone(), judge.clone(), fast_poll()).with_clock(clock.clone());
    Harness {
        service: Arc::new(service),
        store,
        judge,
        clock,
    }
}

fn ctx(operation: &'static str) -> RequestContext {
    RequestContext::new("learner-1", operation)
}

fn case(input: &str, expected: &str) -> TestCase {
    TestCase {
        description: String::new(),
        input: input.to_string(),
        expected_output: expected.to_string(),
    }
}

fn evaluate_request(test_cases: Vec<TestCase>, points: u64) -> EvaluateRequest {
    EvaluateRequest {
        language: "python".to_string(),
        source_code: "print(input().upper())".to_string(),
        test_cases,
        points,
        exercise_id: Some("ex-1".to_string()),
    }
}

async fn history_len(store: &dyn DocumentStore) -> usize {
    store
        .query_prefix(&keys::user_partition("learner-1"), keys::XP_PREFIX, None, false)
        .await
        .unwrap()
        .len()
}

#[tokio::test(start_paused = true)]
async fn test_execute_through_service() {
    let h = harness();

    let result = h
        .service
        .execute(&ctx("execute"), "print(input().upper())", "Python", Some("hi"))
        .await
        .unwrap();

    assert_eq!(result.stdout, "HI\n");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.execution_time_ms, 10);
}

#[tokio::test]
async fn test_execute_rejects_empty_source() {
    let h = harness();

    let err = h
        .service
        .execute(&ctx("execute"), "   ", "python", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(h.judge.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_all_passed_awards_xp() {
    let h = harness();

    let report = h
        .service
        .evaluate_solution(
            &ctx("evaluateSolution"),
            evaluate_request(vec![case("abc", "ABC"), case("  xy ", "  XY")], 50),
        )
        .await
        .unwrap();

    assert!(report.all_passed);
    assert_eq!(report.test_results.len(), 2);
    assert_eq!(report.test_results[0].test_case_id, "case_1");
    assert_eq!(report.test_results[0].actual_output, "ABC");
    assert!(report.feedback.is_none());

    let xp = report.xp.unwrap();
    assert_eq!(xp.points_awarded, 50);
    assert_eq!(xp.state.total_xp, 50);
    assert_eq!(history_len(h.store.as_ref()).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_wrong_answer_awards_nothing() {
    let h = harness();

    let report = h
        .service
        .evaluate_solution(
            &ctx("evaluateSolution"),
            evaluate_request(vec![case("abc", "ABC"), case("abc", "abc")], 50),
        )
        .await
        .unwrap();

    assert!(!report.all_passed);
    assert!(report.test_results[0].passed);
    assert!(!report.test_results[1].passed);
    assert!(report.xp.is_none());
    assert_eq!(h.store.get(&keys::user_partition("learner-1"), keys::PROFILE_KEY).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_case_error_does_not_abort_others() {
    let h = harness();

    let report = h
        .service
        .evaluate_solution(
            &ctx("evaluateSolution"),
            evaluate_request(vec![case("explode", "BOOM"), case("ok", "OK")], 10),
        )
        .await
        .unwrap();

    assert!(!report.all_passed);
    assert_eq!(report.test_results[0].actual_output, "Error: judge poll failed: 502");
    assert!(report.test_results[1].passed);
    assert_eq!(h.judge.submit_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_evaluate_unsupported_language_makes_no_calls() {
    let h = harness();
    let mut request = evaluate_request(vec![case("a", "A")], 10);
    request.language = "cobol".to_string();

    let err = h
        .service
        .evaluate_solution(&ctx("evaluateSolution"), request)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnsupportedLanguage);
    assert!(!err.suggestions.is_empty());
    assert_eq!(h.judge.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_without_cases_is_a_syntax_check() {
    let h = harness();

    let ok = h
        .service
        .evaluate_solution(&ctx("evaluateSolution"), evaluate_request(vec![], 0))
        .await
        .unwrap();
    assert!(ok.all_passed);
    assert_eq!(ok.test_results[0].test_case_id, "syntax_check");
    assert_eq!(ok.test_results[0].expected_output, "Exit code 0");

    let mut broken = evaluate_request(vec![], 0);
    broken.source_code = "compile_error(".to_string();
    let report = h
        .service
        .evaluate_solution(&ctx("evaluateSolution"), broken)
        .await
        .unwrap();
    assert!(!report.all_passed);
    assert_eq!(report.test_results[0].actual_output, "error: expected expression");
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_includes_model_feedback() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(CannedModel {
        reply: Some("```json\n{\"feedback\": \"Clean and correct.\"}\n```".to_string()),
        calls: AtomicU32::new(0),
    });
    let service = Service::new(store, Arc::new(EchoJudge::default()), fast_poll())
        .with_llm(model.clone())
        .with_clock(FixedClock::at(start()));

    let report = service
        .evaluate_solution(&ctx("evaluateSolution"), evaluate_request(vec![case("a", "A")], 25))
        .await
        .unwrap();

    assert_eq!(report.feedback.as_deref(), Some("Clean and correct."));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_model_outage_fails_before_xp_is_committed() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(CannedModel {
        reply: None,
        calls: AtomicU32::new(0),
    });
    let service = Service::new(store.clone(), Arc::new(EchoJudge::default()), fast_poll())
        .with_llm(model.clone())
        .with_llm_retry(RetryPolicy::exponential_llm())
        .with_clock(FixedClock::at(start()));

    let err = service
        .evaluate_solution(&ctx("evaluateSolution"), evaluate_request(vec![case("a", "A")], 25))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::AiServiceUnavailable);
    assert!(err.is_retryable());
    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    assert_eq!(history_len(store.as_ref()).await, 0);
}

#[tokio::test]
async fn test_update_xp_creates_profile_and_tracks_streak() {
    let h = harness();
    let c = ctx("updateXP");

    let first = h
        .service
        .update_xp(&c, ActionKind::QuizComplete, 80, json!({"quizId": "q1"}))
        .await
        .unwrap();
    assert_eq!(first.points_awarded, 120);
    assert_eq!(first.state.level, 2);
    assert_eq!(first.state.streak, 1);
    assert_eq!(first.new_badges[0].badge.id, BadgeId::FirstXp);

    h.clock.advance(ChronoDuration::days(1));
    let second = h
        .service
        .update_xp(&c, ActionKind::ExerciseComplete, 10, json!({}))
        .await
        .unwrap();
    assert_eq!(second.state.total_xp, 130);
    assert_eq!(second.state.streak, 2);
    assert!(second.new_badges.is_empty());
    assert_eq!(
        second.state.earned_badges[&BadgeId::FirstXp],
        start(),
        "earned_at is never re-stamped"
    );
    assert_eq!(history_len(h.store.as_ref()).await, 2);
}

#[tokio::test]
async fn test_update_xp_survives_lost_races() {
    let store = Arc::new(ContendedStore::new(2));
    let service = Service::new(store.clone(), Arc::new(EchoJudge::default()), fast_poll())
        .with_clock(FixedClock::at(start()));

    let award = service
        .update_xp(&ctx("updateXP"), ActionKind::ExerciseComplete, 40, json!({}))
        .await
        .unwrap();

    assert_eq!(award.state.total_xp, 40);
    assert_eq!(store.cas_calls.load(Ordering::SeqCst), 3);
    assert_eq!(history_len(store.as_ref()).await, 1);
}

#[tokio::test]
async fn test_update_xp_contention_is_throttled() {
    let store = Arc::new(ContendedStore::new(u32::MAX));
    let service = Service::new(store.clone(), Arc::new(EchoJudge::default()), fast_poll());

    let err = service
        .update_xp(&ctx("updateXP"), ActionKind::ExerciseComplete, 40, json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::DatabaseThrottled);
    assert!(err.is_retryable());
    assert_eq!(
        store.cas_calls.load(Ordering::SeqCst),
        crate::service::MAX_XP_UPDATE_ATTEMPTS
    );
    assert_eq!(history_len(store.as_ref()).await, 0);
}

#[tokio::test]
async fn test_history_failure_keeps_committed_award() {
    let store = Arc::new(ContendedStore::without_history());
    let service = Service::new(store.clone(), Arc::new(EchoJudge::default()), fast_poll())
        .with_clock(FixedClock::at(start()));

    let award = service
        .update_xp(&ctx("updateXP"), ActionKind::ExerciseComplete, 40, json!({}))
        .await
        .unwrap();
    assert_eq!(award.state.total_xp, 40);
    assert_eq!(history_len(store.as_ref()).await, 0);

    let profile = store
        .get(&keys::user_partition("learner-1"), keys::PROFILE_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.version, 1);
}

#[tokio::test]
async fn test_points_above_cap_are_rejected() {
    let h = harness();
    let c = ctx("updateXP");

    let err = h
        .service
        .update_xp(&c, ActionKind::Milestone, u64::MAX, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(history_len(h.store.as_ref()).await, 0);

    let request = evaluate_request(vec![case("a", "A")], MAX_RAW_POINTS + 1);
    let err = h
        .service
        .evaluate_solution(&ctx("evaluateSolution"), request)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(h.judge.submit_calls.load(Ordering::SeqCst), 0);

    let award = h
        .service
        .update_xp(&c, ActionKind::Milestone, MAX_RAW_POINTS, json!({}))
        .await
        .unwrap();
    assert_eq!(award.state.total_xp, 2 * MAX_RAW_POINTS);
    let award = h
        .service
        .update_xp(&c, ActionKind::ExerciseComplete, 10, json!({}))
        .await
        .unwrap();
    assert_eq!(award.state.total_xp, 2 * MAX_RAW_POINTS + 10);
}

#[tokio::test]
async fn test_concurrent_awards_are_not_lost() {
    let h = harness();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .update_xp(&ctx("updateXP"), ActionKind::ExerciseComplete, 10, json!({}))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let progress = h.service.user_progress(&ctx("getUserProgress")).await.unwrap();
    assert_eq!(progress.total_xp, 100);
    assert_eq!(progress.streak, 1);
    assert_eq!(progress.recent_activity.len(), 10);
}

#[tokio::test]
async fn test_flashcard_session_awards() {
    let h = harness();
    let c = ctx("saveFlashcardSession");

    let perfect = h.service.record_flashcard_session(&c, 12, 12).await.unwrap();
    assert_eq!(perfect.points_awarded, 10);

    let partial = h.service.record_flashcard_session(&c, 12, 7).await.unwrap();
    assert_eq!(partial.points_awarded, 5);
    assert_eq!(partial.state.total_xp, 15);

    let err = h.service.record_flashcard_session(&c, 3, 4).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_rejected_study_session_leaves_profile_alone() {
    let h = harness();
    let c = ctx("completeStudySession");

    let rejected = h.service.record_study_session(&c, 90, false).await.unwrap();
    assert_eq!(rejected.points_awarded, 0);
    assert_eq!(rejected.state.streak, 0);
    assert_eq!(history_len(h.store.as_ref()).await, 0);

    let accepted = h.service.record_study_session(&c, 90, true).await.unwrap();
    assert_eq!(accepted.points_awarded, 30);
    assert_eq!(accepted.state.streak, 1);
}

#[tokio::test]
async fn test_submit_review_schedules_next_date() {
    let h = harness();
    let c = ctx("submitReview");

    let first = h.service.submit_review(&c, "ownership", 5).await.unwrap();
    assert_eq!(first.repetitions, 1);
    assert_eq!(first.scheduled_for, start() + ChronoDuration::days(1));

    h.clock.advance(ChronoDuration::days(1));
    let second = h.service.submit_review(&c, "ownership", 4).await.unwrap();
    assert_eq!(second.interval_days, 6);
    assert_eq!(second.repetitions, 2);

    let err = h.service.submit_review(&c, "ownership", 6).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);

    let err = h.service.submit_review(&c, "", 3).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_scheduled_reviews_partition() {
    let h = harness();
    let c = ctx("getScheduledReviews");

    // due tomorrow, then in six days, then failed and due tomorrow again
    h.service.submit_review(&c, "borrowing", 5).await.unwrap();
    h.service.submit_review(&c, "lifetimes", 5).await.unwrap();
    h.service.submit_review(&c, "lifetimes", 4).await.unwrap();
    h.service.submit_review(&c, "traits", 1).await.unwrap();

    let today = h.service.scheduled_reviews(&c).await.unwrap();
    assert!(today.due_reviews.is_empty());
    assert_eq!(today.upcoming_reviews.len(), 3);
    assert_eq!(today.upcoming_reviews[2].concept_id, "lifetimes");

    h.clock.advance(ChronoDuration::days(2));
    let later = h.service.scheduled_reviews(&c).await.unwrap();
    let due: Vec<_> = later.due_reviews.iter().map(|r| r.concept_id.as_str()).collect();
    assert_eq!(due.len(), 2);
    assert!(due.contains(&"borrowing") && due.contains(&"traits"));
    assert_eq!(later.upcoming_reviews.len(), 1);
}

#[tokio::test]
async fn test_progress_caps_recent_activity() {
    let h = harness();
    let c = ctx("updateXP");
    for i in 0..25u64 {
        h.service
            .update_xp(&c, ActionKind::ExerciseComplete, i, json!({"n": i}))
            .await
            .unwrap();
        h.clock.advance(ChronoDuration::minutes(1));
    }
    h.service.submit_review(&c, "closures", 2).await.unwrap();
    h.clock.advance(ChronoDuration::days(1));

    let progress = h.service.user_progress(&ctx("getUserProgress")).await.unwrap();

    // 0 + 1 + ... + 24
    assert_eq!(progress.total_xp, 300);
    assert_eq!(progress.level, 2);
    assert_eq!(progress.recent_activity.len(), 20);
    assert_eq!(progress.recent_activity[0].points, 24);
    assert_eq!(progress.recent_activity[19].points, 5);
    assert_eq!(progress.due_review_count, 1);
    assert_eq!(progress.badges.len(), 1);
    assert_eq!(progress.badges[0].badge.id, BadgeId::FirstXp);
}

#[tokio::test]
async fn test_progress_for_unknown_user_is_empty() {
    let h = harness();

    let progress = h
        .service
        .user_progress(&RequestContext::new("nobody", "getUserProgress"))
        .await
        .unwrap();

    assert_eq!(progress.total_xp, 0);
    assert_eq!(progress.level, 1);
    assert!(progress.recent_activity.is_empty());
}

#[tokio::test]
async fn test_missing_user_is_invalid_input() {
    let h = harness();

    let err = h
        .service
        .update_xp(
            &RequestContext::new("", "updateXP"),
            ActionKind::Milestone,
            10,
            json!({}),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidInput);
}
