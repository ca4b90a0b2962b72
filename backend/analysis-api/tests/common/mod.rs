#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use feedflow_analysis::{
    config::Config,
    create_router,
    models::{
        attempt::{AttemptOutcome, SolveAttempt, SolveEvent, SolveEventKind, SolveStep},
        plan::{ContentArea, Difficulty, EvaluationArea, LearningStage},
        ProblemInfo, ProblemSet, ProblemSetStatus, ProblemTags,
    },
    services::{
        assistant_client::{AssistantBackend, AssistantError, RunHandle, RunStatus},
        AppState,
    },
    store::{AnalysisStore, MemoryStore},
};

pub const FEATURE_ASSISTANT: &str = "asst_features";
pub const REPORT_ASSISTANT: &str = "asst_report";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn test_config() -> Config {
    let mut config = Config::local();
    config.llm.poll_interval_ms = 1;
    config.llm.timeout_secs = 5;
    config.llm.feature_assistant_id = Some(FEATURE_ASSISTANT.to_string());
    config.llm.report_assistant_id = Some(REPORT_ASSISTANT.to_string());
    config
}

/// Assistant backend answering each assistant id with a canned reply.
/// Assistants without a reply end their run as `failed`.
#[derive(Default)]
pub struct ScriptedAssistant {
    replies: Mutex<HashMap<String, String>>,
    runs: AtomicUsize,
    messages: Mutex<Vec<(String, String)>>,
}

impl ScriptedAssistant {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(self: &Arc<Self>, assistant_id: &str, reply: &str) -> Arc<Self> {
        self.replies
            .lock()
            .unwrap()
            .insert(assistant_id.to_string(), reply.to_string());
        self.clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn messages_for(&self, assistant_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == assistant_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl AssistantBackend for ScriptedAssistant {
    async fn start_run(&self, assistant_id: &str, message: &str) -> Result<RunHandle, AssistantError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .unwrap()
            .push((assistant_id.to_string(), message.to_string()));
        Ok(RunHandle {
            thread_id: format!("thread-{}", assistant_id),
            run_id: assistant_id.to_string(),
        })
    }

    async fn run_status(&self, run: &RunHandle) -> Result<RunStatus, AssistantError> {
        if self.replies.lock().unwrap().contains_key(&run.run_id) {
            Ok(RunStatus::Completed)
        } else {
            Ok(RunStatus::Failed)
        }
    }

    async fn latest_reply(&self, run: &RunHandle) -> Result<String, AssistantError> {
        self.replies
            .lock()
            .unwrap()
            .get(&run.run_id)
            .cloned()
            .ok_or(AssistantError::EmptyReply)
    }
}

pub fn app_state(store: Arc<MemoryStore>, assistant: Option<Arc<ScriptedAssistant>>) -> Arc<AppState> {
    init_tracing();
    let backend = assistant.map(|a| a as Arc<dyn AssistantBackend>);
    let store: Arc<dyn AnalysisStore> = store;
    Arc::new(AppState::with_backend(test_config(), store, backend))
}

pub fn create_test_app(store: Arc<MemoryStore>, assistant: Option<Arc<ScriptedAssistant>>) -> Router {
    create_router(app_state(store, assistant))
}

pub fn problem(id: &str, evaluation: EvaluationArea, content: ContentArea, created_secs: i64) -> ProblemInfo {
    ProblemInfo {
        id: id.to_string(),
        problem_text: format!("Problem {}: 48 / 6 = ?", id),
        correct_option: Some("2".to_string()),
        tags: ProblemTags {
            learning_stage: Some(LearningStage::Basic),
            evaluation_area: Some(evaluation),
            content_area: Some(content),
            difficulty: Some(Difficulty::Medium),
        },
        created_at: at(created_secs),
    }
}

pub fn problem_set(id: &str, user_id: &str, status: ProblemSetStatus, created_secs: i64) -> ProblemSet {
    ProblemSet {
        id: id.to_string(),
        user_id: user_id.to_string(),
        status,
        user_grade: None,
        diagnosis_text: None,
        created_at: at(created_secs),
        completed_at: None,
    }
}

pub struct AttemptSpec<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub problem_id: &'a str,
    pub problem_set_id: &'a str,
    pub start_secs: i64,
    pub first_input_secs: Option<i64>,
    pub submit_secs: Option<i64>,
    pub outcome: AttemptOutcome,
    pub expected_score: Option<f64>,
}

impl AttemptSpec<'_> {
    pub fn build(&self) -> SolveAttempt {
        SolveAttempt {
            id: self.id.to_string(),
            user_id: self.user_id.to_string(),
            problem_id: self.problem_id.to_string(),
            problem_set_id: self.problem_set_id.to_string(),
            started_at: at(self.start_secs),
            submitted_at: self.submit_secs.map(at),
            first_input_at: self.first_input_secs.map(at),
            outcome: Some(self.outcome),
            expected_score: self.expected_score,
            self_confidence: None,
            attempt_count: 1,
        }
    }
}

pub fn event(kind: SolveEventKind, secs: i64) -> SolveEvent {
    SolveEvent::new(kind, Some(at(secs)))
}

pub fn step(index: i32, content: &str, created_secs: i64, deleted: bool) -> SolveStep {
    SolveStep {
        step_index: index,
        content: content.to_string(),
        is_deleted: deleted,
        created_at: at(created_secs),
        updated_at: at(created_secs),
    }
}

/// Seeds the reference attempt: start T0, first input T0+30s, last key input
/// T0+96s, submitted correct at T0+120s, no hints.
pub async fn seed_reference_attempt(store: &MemoryStore, attempt_id: &str, set_id: &str, problem_id: &str) {
    store
        .insert_attempt(
            AttemptSpec {
                id: attempt_id,
                user_id: "student-1",
                problem_id,
                problem_set_id: set_id,
                start_secs: 0,
                first_input_secs: Some(30),
                submit_secs: Some(120),
                outcome: AttemptOutcome::Correct,
                expected_score: Some(80.0),
            }
            .build(),
        )
        .await;
    store.push_event(attempt_id, event(SolveEventKind::ProblemViewed, 0)).await;
    store.push_event(attempt_id, event(SolveEventKind::FirstInput, 30)).await;
    store.push_event(attempt_id, event(SolveEventKind::KeyInput, 30)).await;
    store.push_event(attempt_id, event(SolveEventKind::StepCreated, 40)).await;
    store.push_event(attempt_id, event(SolveEventKind::KeyInput, 60)).await;
    store.push_event(attempt_id, event(SolveEventKind::StepCreated, 70)).await;
    store.push_event(attempt_id, event(SolveEventKind::KeyInput, 96)).await;
    store.push_event(attempt_id, event(SolveEventKind::SubmitClick, 120)).await;
    store.upsert_step(attempt_id, step(0, "48 / 6", 40, false)).await;
    store.upsert_step(attempt_id, step(1, "= 8", 70, false)).await;
}

/// One in-progress set of three attempts for `student-1`, plus a completed
/// earlier set whose outcomes drive the plan.
pub async fn seed_student_history(store: &MemoryStore) {
    store
        .insert_problem_set(problem_set("set-old", "student-1", ProblemSetStatus::Completed, -86_400))
        .await;
    store
        .insert_problem(
            "set-old",
            problem("p-old-1", EvaluationArea::Calculation, ContentArea::NumberAndOperation, -86_400),
        )
        .await;
    store
        .insert_problem(
            "set-old",
            problem("p-old-2", EvaluationArea::Reasoning, ContentArea::ChangeAndRelation, -86_390),
        )
        .await;
    for (id, problem_id, start, outcome) in [
        ("a-old-1", "p-old-1", -86_000, AttemptOutcome::Correct),
        ("a-old-2", "p-old-2", -85_000, AttemptOutcome::Incorrect),
    ] {
        store
            .insert_attempt(
                AttemptSpec {
                    id,
                    user_id: "student-1",
                    problem_id,
                    problem_set_id: "set-old",
                    start_secs: start,
                    first_input_secs: Some(start + 20),
                    submit_secs: Some(start + 100),
                    outcome,
                    expected_score: None,
                }
                .build(),
            )
            .await;
    }

    store
        .insert_problem_set(problem_set("set-1", "student-1", ProblemSetStatus::InProgress, 0))
        .await;
    store.set_user_grade("student-1", "초6").await;
    store
        .insert_problem(
            "set-1",
            problem("p-1", EvaluationArea::Calculation, ContentArea::NumberAndOperation, 0),
        )
        .await;
    store
        .insert_problem(
            "set-1",
            problem("p-2", EvaluationArea::Reasoning, ContentArea::ChangeAndRelation, 1),
        )
        .await;
    store
        .insert_problem(
            "set-1",
            problem("p-3", EvaluationArea::Understanding, ContentArea::DataAndProbability, 2),
        )
        .await;

    seed_reference_attempt(store, "a-1", "set-1", "p-1").await;

    store
        .insert_attempt(
            AttemptSpec {
                id: "a-2",
                user_id: "student-1",
                problem_id: "p-2",
                problem_set_id: "set-1",
                start_secs: 200,
                first_input_secs: Some(220),
                submit_secs: Some(400),
                outcome: AttemptOutcome::Incorrect,
                expected_score: Some(90.0),
            }
            .build(),
        )
        .await;
    store
        .push_event(
            "a-2",
            event(
                SolveEventKind::HintClick {
                    hint_type: feedflow_analysis::models::attempt::HintType::Concept,
                },
                250,
            ),
        )
        .await;
    store.push_event("a-2", event(SolveEventKind::KeyInput, 260)).await;
    store.push_event("a-2", event(SolveEventKind::KeyInput, 300)).await;
    store.push_event("a-2", event(SolveEventKind::SubmitClick, 400)).await;
    store.upsert_step("a-2", step(0, "x + 3 = 7", 260, false)).await;

    store
        .insert_attempt(
            AttemptSpec {
                id: "a-3",
                user_id: "student-1",
                problem_id: "p-3",
                problem_set_id: "set-1",
                start_secs: 500,
                first_input_secs: None,
                submit_secs: None,
                outcome: AttemptOutcome::GaveUp,
                expected_score: None,
            }
            .build(),
        )
        .await;
    store.push_event("a-3", event(SolveEventKind::StepCreated, 510)).await;
    store.push_event("a-3", event(SolveEventKind::StepUpdated, 520)).await;
    store.push_event("a-3", event(SolveEventKind::GiveUp, 560)).await;
    store.upsert_step("a-3", step(0, "?", 510, false)).await;
}
