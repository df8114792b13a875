//! 批改流程集成测试
//!
//! 使用脚本化的假模型和手动时钟，覆盖从提交到记账的完整路径

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use essay_grader::error::{
    ConfigurationError, GradingError, ProviderError, ProviderErrorClass, SchemaViolation,
    ValidationError,
};
use essay_grader::models::document::DocumentUpload;
use essay_grader::models::usage::{UsageLimits, UsageWindow};
use essay_grader::models::{EssayType, GradingRequest, RubricType, SaqParts};
use essay_grader::services::llm_service::document_data_urls;
use essay_grader::services::{GradingModel, ModelRequest, Rubric};
use essay_grader::{
    DocumentCache, GradingFlow, GradingPolicy, InMemoryDocumentCache, InMemoryUsageGuard,
    ManualClock, UsageGuard,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ========== 测试辅助 ==========

enum Step {
    Reply(Value),
    Fail(ProviderError),
    /// 模拟模型迟迟不返回
    Hang,
}

/// 按脚本逐次返回的假模型，脚本用完后重复 `fallback`
struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    fallback: Value,
    calls: Arc<AtomicUsize>,
    /// 每次调用收到的 (用户消息, 文档图片 data URL)
    seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl ScriptedModel {
    fn new(fallback: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }
}

impl GradingModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let urls = document_data_urls(request.documents.as_deref());
        assert_eq!(urls.len(), request.image_count());
        self.seen
            .lock()
            .unwrap()
            .push((request.user_message.clone(), urls));
        let step = self.script.lock().unwrap().pop_front();

        // 让出执行权，使并发请求真正交错
        tokio::task::yield_now().await;

        match step {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Transient("hung".to_string()))
            }
            None => Ok(self.fallback.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// 按评分方案构造一份合法的模型输出
fn graded(rubric: Rubric, scores: &[u32]) -> Value {
    let mut breakdown = serde_json::Map::new();
    for (spec, score) in rubric.items().iter().zip(scores) {
        breakdown.insert(
            spec.key.to_string(),
            json!({
                "score": score,
                "max_score": spec.max_score,
                "feedback": format!("{} feedback", spec.label),
            }),
        );
    }
    json!({
        "score": scores.iter().sum::<u32>(),
        "max_score": rubric.max_score(),
        "breakdown": breakdown,
        "overall_feedback": "Clear argument with room to deepen analysis.",
        "suggestions": ["Explain how each document supports the thesis."],
        "warnings": []
    })
}

fn words(n: usize) -> String {
    vec!["history"; n].join(" ")
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 5).unwrap()
}

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn png_upload() -> DocumentUpload {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(&[0u8; 32]);
    DocumentUpload::new("image/png", bytes)
}

/// 每组、每张图片字节各不相同
fn tagged_uploads(tag: u8) -> Vec<DocumentUpload> {
    (1..=7u8)
        .map(|doc_num| {
            let mut bytes = PNG_MAGIC.to_vec();
            bytes.extend_from_slice(&[tag, doc_num, tag.wrapping_mul(doc_num)]);
            DocumentUpload::new("image/png", bytes)
        })
        .collect()
}

fn dbq_request() -> GradingRequest {
    GradingRequest::essay(
        EssayType::Dbq,
        "Evaluate the extent to which the Industrial Revolution changed labor.",
        words(320),
    )
}

fn saq_request() -> GradingRequest {
    GradingRequest::saq(
        "Identify and explain one cause of the Cold War.",
        SaqParts::new(words(15), words(15), words(15)),
    )
}

struct Harness {
    clock: Arc<ManualClock>,
    flow: GradingFlow<ScriptedModel>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl Harness {
    fn new(model: ScriptedModel) -> Self {
        Self::with_limits(model, UsageLimits::default())
    }

    fn with_limits(model: ScriptedModel, limits: UsageLimits) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let cache: Arc<dyn DocumentCache> = Arc::new(InMemoryDocumentCache::new(clock.clone()));
        let guard: Arc<dyn UsageGuard> = Arc::new(InMemoryUsageGuard::new(clock.clone(), limits));
        let calls = model.calls.clone();
        let seen = model.seen.clone();
        Self {
            clock,
            flow: GradingFlow::new(model, cache, guard, GradingPolicy::default()),
            calls,
            seen,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn essays_remaining_today(&self) -> u64 {
        self.flow.usage_summary().essays_remaining_today
    }
}

// ========== 端到端场景 ==========

#[tokio::test]
async fn test_saq_college_board_default() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 0]));
    let h = Harness::new(model);

    let response = assert_ok!(h.flow.submit(saq_request()).await);

    assert_eq!(response.max_score, 3);
    assert_eq!(response.score, 2);
    assert_eq!(response.word_count, 45);
    assert_eq!(response.paragraph_count, 3);
    assert_eq!(h.calls(), 1);
    assert_eq!(h.essays_remaining_today(), 99);
    assert_eq!(h.flow.usage_summary().words_remaining_today, 150_000 - 45);
}

#[tokio::test]
async fn test_saq_eg_rubric() {
    let model = ScriptedModel::new(graded(Rubric::SaqEg, &[4, 3, 2]));
    let h = Harness::new(model);

    let response = assert_ok!(h.flow.submit(saq_request().with_rubric(RubricType::Eg)).await);
    assert_eq!(response.max_score, 10);
    assert_eq!(response.score, 9);
    assert_eq!(response.letter_grade.to_string(), "A");
}

#[tokio::test]
async fn test_dbq_with_documents_attaches_images() {
    let model = ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 2, 1]));
    let h = Harness::new(model);

    let created = assert_ok!(h.flow.upload_documents(vec![png_upload(); 7]));
    assert_eq!(created.count, 7);

    let request = dbq_request().with_document_set(created.document_set_id);
    let response = assert_ok!(h.flow.submit(request).await);

    assert_eq!(response.score, 5);
    assert_eq!(response.max_score, 6);
    let seen = h.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1.len(), 7);
    assert!(seen[0].1.iter().all(|url| url.starts_with("data:image/png;base64,")));
}

#[tokio::test]
async fn test_expired_document_set_consumes_no_quota() {
    let model = ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 2, 1]));
    let h = Harness::new(model);

    let created = assert_ok!(h.flow.upload_documents(vec![png_upload(); 7]));
    h.clock.advance(TimeDelta::hours(2) + TimeDelta::seconds(1));

    let request = dbq_request().with_document_set(created.document_set_id.clone());
    let err = assert_err!(h.flow.submit(request).await);

    match err {
        GradingError::DocumentSetExpired { id, .. } => assert_eq!(id, created.document_set_id),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.calls(), 0);
    assert_eq!(h.essays_remaining_today(), 100);
    assert_eq!(h.flow.usage_summary().words_remaining_today, 150_000);
}

#[tokio::test]
async fn test_unknown_document_set() {
    let h = Harness::new(ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 1, 1])));

    let err = assert_err!(h.flow.submit(dbq_request().with_document_set("missing")).await);
    assert!(matches!(err, GradingError::DocumentSetNotFound { .. }));
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn test_twenty_first_request_in_a_minute_is_denied() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1]));
    let h = Harness::new(model);

    for _ in 0..20 {
        assert_ok!(h.flow.submit(saq_request()).await);
    }

    let err = assert_err!(h.flow.submit(saq_request()).await);
    match err {
        GradingError::QuotaExceeded(denied) => {
            assert_eq!(denied.window, UsageWindow::RequestsPerMinute);
            assert_eq!(
                denied.resets_at,
                Utc.with_ymd_and_hms(2026, 3, 2, 10, 1, 0).unwrap()
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.calls(), 20);

    // 进入下一分钟后恢复
    h.clock.advance(TimeDelta::minutes(1));
    assert_ok!(h.flow.submit(saq_request()).await);
}

#[tokio::test]
async fn test_sum_mismatch_is_schema_error_without_commit() {
    let mut raw = graded(Rubric::Dbq, &[1, 1, 2, 1]);
    raw["score"] = json!(6);
    let h = Harness::new(ScriptedModel::new(raw));

    let err = assert_err!(h.flow.submit(dbq_request()).await);

    assert!(matches!(
        err,
        GradingError::SchemaMismatch(SchemaViolation::ScoreSumMismatch { reported: 6, sum: 5 })
    ));
    assert_eq!(h.calls(), 1);
    assert_eq!(h.essays_remaining_today(), 100);
    assert_eq!(
        err.user_message(),
        "Grading service temporarily unavailable. Please try again later."
    );
}

#[tokio::test]
async fn test_malformed_output_is_not_retried() {
    let model = ScriptedModel::new(graded(Rubric::Leq, &[1, 1, 1, 1]))
        .then(Step::Fail(ProviderError::Malformed("expected value".to_string())));
    let h = Harness::new(model);

    let request = GradingRequest::essay(EssayType::Leq, "Compare two empires.", words(300));
    let err = assert_err!(h.flow.submit(request).await);

    assert!(matches!(
        err,
        GradingError::SchemaMismatch(SchemaViolation::MalformedJson { .. })
    ));
    assert_eq!(h.calls(), 1);
}

// ========== 重试与超时 ==========

#[tokio::test(start_paused = true)]
async fn test_transient_error_is_retried() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1]))
        .then(Step::Fail(ProviderError::Transient("503 Service Unavailable".to_string())))
        .then(Step::Reply(graded(Rubric::SaqCollegeBoard, &[1, 0, 1])));
    let h = Harness::new(model);

    let response = assert_ok!(h.flow.submit(saq_request()).await);
    assert_eq!(response.score, 2);
    assert_eq!(h.calls(), 2);
    assert_eq!(h.essays_remaining_today(), 99);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_exhaust_retries() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1]))
        .then(Step::Fail(ProviderError::Transient("connection reset".to_string())))
        .then(Step::Fail(ProviderError::Transient("connection reset".to_string())))
        .then(Step::Fail(ProviderError::Transient("connection reset".to_string())));
    let h = Harness::new(model);

    let err = assert_err!(h.flow.submit(saq_request()).await);
    match err {
        GradingError::AiProvider { class, attempts, .. } => {
            assert_eq!(class, ProviderErrorClass::Transient);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.calls(), 3);
    assert_eq!(h.essays_remaining_today(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1]))
        .then(Step::Fail(ProviderError::Fatal("Incorrect API key provided".to_string())));
    let h = Harness::new(model);

    let err = assert_err!(h.flow.submit(saq_request()).await);
    assert!(matches!(
        err,
        GradingError::AiProvider {
            class: ProviderErrorClass::Fatal,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(h.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_transient() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1]))
        .then(Step::Hang)
        .then(Step::Hang)
        .then(Step::Hang);
    let h = Harness::new(model);

    let started = tokio::time::Instant::now();
    let err = assert_err!(h.flow.submit(saq_request()).await);

    assert!(matches!(
        err,
        GradingError::AiProvider {
            class: ProviderErrorClass::Transient,
            attempts: 3,
            ..
        }
    ));
    // 3 × 45s 超时 + 0.5s + 1s 退避
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(136_500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(140), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_success() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[0, 1, 1])).then(Step::Hang);
    let h = Harness::new(model);

    let response = assert_ok!(h.flow.submit(saq_request()).await);
    assert_eq!(response.score, 2);
    assert_eq!(h.calls(), 2);
}

// ========== 校验顺序 ==========

#[tokio::test]
async fn test_rubric_on_dbq_is_configuration_error() {
    let h = Harness::new(ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 1, 1])));

    let err = assert_err!(h.flow.submit(dbq_request().with_rubric(RubricType::Eg)).await);
    assert!(matches!(
        err,
        GradingError::Configuration(ConfigurationError::IllegalRubric { .. })
    ));
    assert_eq!(h.calls(), 0);
    assert_eq!(h.essays_remaining_today(), 100);
}

#[tokio::test]
async fn test_short_essay_is_rejected_before_model_call() {
    let h = Harness::new(ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 1, 1])));

    let request = GradingRequest::essay(EssayType::Dbq, "Prompt", words(50));
    let err = assert_err!(h.flow.submit(request).await);

    assert!(matches!(
        err,
        GradingError::Validation(ValidationError::TooShort { words: 50, .. })
    ));
    assert_eq!(h.calls(), 0);
    assert_eq!(h.essays_remaining_today(), 100);
}

#[tokio::test]
async fn test_quota_checked_before_documents() {
    let limits = UsageLimits {
        essays_per_day: 1,
        ..UsageLimits::default()
    };
    let h = Harness::with_limits(
        ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 1, 1])),
        limits,
    );
    assert_ok!(h.flow.submit(dbq_request()).await);

    // 文档组不存在，但配额先拒绝
    let err = assert_err!(h.flow.submit(dbq_request().with_document_set("missing")).await);
    match err {
        GradingError::QuotaExceeded(denied) => assert_eq!(denied.window, UsageWindow::EssaysPerDay),
        other => panic!("unexpected error: {other:?}"),
    }
}

// ========== 并发 ==========

#[tokio::test]
async fn test_malformed_requests_still_count_against_request_window() {
    let h = Harness::new(ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1])));

    for _ in 0..20 {
        let err = assert_err!(
            h.flow
                .submit(GradingRequest::saq("", SaqParts::new("a", "b", "c")))
                .await
        );
        assert!(matches!(
            err,
            GradingError::Validation(ValidationError::EmptyPrompt)
        ));
    }

    // 第 21 次在任何校验之前被限流
    let err = assert_err!(
        h.flow
            .submit(GradingRequest::saq("", SaqParts::new("a", "b", "c")))
            .await
    );
    match err {
        GradingError::QuotaExceeded(denied) => {
            assert_eq!(denied.window, UsageWindow::RequestsPerMinute)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let summary = h.flow.usage_summary();
    assert_eq!(summary.requests_remaining_this_minute, 0);
    assert_eq!(summary.essays_remaining_today, 100);
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_document_sets_stay_isolated() {
    let h = Harness::new(ScriptedModel::new(graded(Rubric::Dbq, &[1, 1, 1, 1])));

    let mut sets = Vec::new();
    for tag in 1..=4u8 {
        let uploads = tagged_uploads(tag);
        let created = assert_ok!(h.flow.upload_documents(uploads.clone()));
        sets.push((tag, created.document_set_id, uploads));
    }

    let submissions = sets.iter().map(|(tag, id, _)| {
        let request = GradingRequest::essay(
            EssayType::Dbq,
            format!("Document set {tag}: evaluate the causes of the Reformation."),
            words(260),
        )
        .with_document_set(id.clone());
        h.flow.submit(request)
    });
    // 提交进行的同时，其他文档组不断创建和删除
    let churn = async {
        for tag in 200..=205u8 {
            let created = assert_ok!(h.flow.upload_documents(tagged_uploads(tag)));
            tokio::task::yield_now().await;
            h.flow.delete_documents(&created.document_set_id);
        }
    };
    let (results, ()) = futures::join!(futures::future::join_all(submissions), churn);
    for result in results {
        assert_ok!(result);
    }

    for (tag, id, uploads) in &sets {
        let set = assert_ok!(h.flow.documents(id));
        assert_eq!(set.documents.len(), 7);
        for (idx, (doc, upload)) in set.documents.iter().zip(uploads).enumerate() {
            assert_eq!(usize::from(doc.doc_num), idx + 1);
            assert_eq!(doc.bytes, upload.bytes);
        }

        // 模型收到的正是本组图片，且按 doc_num 顺序
        let expected = document_data_urls(Some(set.as_ref()));
        let seen = h.seen.lock().unwrap();
        let marker = format!("Document set {tag}:");
        let (_, urls) = seen
            .iter()
            .find(|(message, _)| message.contains(&marker))
            .expect("model call for set");
        assert_eq!(urls, &expected);
    }
    assert_eq!(h.calls(), 4);
}

#[tokio::test]
async fn test_concurrent_submissions_never_exceed_daily_ceiling() {
    let limits = UsageLimits {
        essays_per_day: 5,
        ..UsageLimits::default()
    };
    let h = Harness::with_limits(
        ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1])),
        limits,
    );

    let submissions = (0..12).map(|_| h.flow.submit(saq_request()));
    let results = futures::future::join_all(submissions).await;

    let graded_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(graded_count, 5);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(GradingError::QuotaExceeded(denied)) if denied.window == UsageWindow::EssaysPerDay
        ));
    }
    assert_eq!(h.calls(), 5);
    assert_eq!(h.essays_remaining_today(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_submission_releases_reservation() {
    let model = ScriptedModel::new(graded(Rubric::SaqCollegeBoard, &[1, 1, 1])).then(Step::Hang);
    let h = Harness::new(model);

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.flow.submit(saq_request())).await;
    assert!(outcome.is_err());

    assert_eq!(h.calls(), 1);
    assert_eq!(h.essays_remaining_today(), 100);
    assert_eq!(h.flow.usage_summary().requests_remaining_this_minute, 19);
}
