//! Storage capability consumed by the feature pipeline.
//!
//! Attempts, steps and events are owned by the solving application; this
//! crate only reads them. Feature rows, plans and report text are the only
//! things written back.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AnalysisResult;
use crate::models::attempt::{AttemptBundle, HistoricalAttempt, SolveAttempt};
use crate::models::feature::FeatureRow;
use crate::models::plan::GenerationPlan;
use crate::models::{GradedAttempt, ProblemInfo, ProblemSet, ProblemTags};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Attempt with its steps, events and (when linked) problem. `NotFound` if missing.
    async fn load_attempt_bundle(&self, attempt_id: &str) -> AnalysisResult<AttemptBundle>;

    /// The user's attempts on problems sharing an evaluation or content area
    /// with `tags`, started before `before`, excluding `exclude_attempt_id`.
    async fn find_user_history(
        &self,
        user_id: &str,
        tags: &ProblemTags,
        before: DateTime<Utc>,
        exclude_attempt_id: &str,
    ) -> AnalysisResult<Vec<HistoricalAttempt>>;

    /// `NotFound` if missing.
    async fn load_problem_set(&self, problem_set_id: &str) -> AnalysisResult<ProblemSet>;

    /// Attempts of a set ordered by start time.
    async fn list_set_attempts(&self, problem_set_id: &str) -> AnalysisResult<Vec<SolveAttempt>>;

    /// Problems of a set ordered by creation time.
    async fn list_set_problems(&self, problem_set_id: &str) -> AnalysisResult<Vec<ProblemInfo>>;

    /// Attempt-scope feature rows of a set.
    async fn list_attempt_rows(&self, problem_set_id: &str) -> AnalysisResult<Vec<FeatureRow>>;

    async fn load_feature_row(&self, row_id: &str) -> AnalysisResult<Option<FeatureRow>>;

    /// Insert or replace by `row.id`. Last write wins.
    async fn upsert_feature_row(&self, row: &FeatureRow) -> AnalysisResult<()>;

    /// Most recently created completed set of the user.
    async fn latest_completed_set(&self, user_id: &str) -> AnalysisResult<Option<ProblemSet>>;

    /// Every attempt with its problem tags, limited to one set when given.
    /// Attempts without a correct outcome count as incorrect.
    async fn list_graded_attempts(
        &self,
        user_id: &str,
        problem_set_id: Option<&str>,
    ) -> AnalysisResult<Vec<GradedAttempt>>;

    /// Stores `plan` for the set and removes every other plan of the user.
    async fn replace_active_plan(
        &self,
        user_id: &str,
        problem_set_id: &str,
        plan: &GenerationPlan,
    ) -> AnalysisResult<()>;

    async fn load_plan(&self, problem_set_id: &str) -> AnalysisResult<Option<GenerationPlan>>;

    /// Stores the diagnosis narrative and marks the set completed.
    async fn complete_problem_set(
        &self,
        problem_set_id: &str,
        diagnosis_text: &str,
    ) -> AnalysisResult<()>;

    async fn ping(&self) -> AnalysisResult<()>;
}
