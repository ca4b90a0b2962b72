use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::AnalysisStore;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::attempt::{
    AttemptBundle, HistoricalAttempt, RawSolveEvent, SolveAttempt, SolveEvent, SolveStep,
};
use crate::models::feature::{FeatureRow, FeatureScope};
use crate::models::plan::GenerationPlan;
use crate::models::{GradedAttempt, ProblemInfo, ProblemSet, ProblemSetStatus, ProblemTags};

#[derive(Default)]
struct Inner {
    attempts: HashMap<String, SolveAttempt>,
    steps: HashMap<String, Vec<SolveStep>>,
    events: HashMap<String, Vec<SolveEvent>>,
    problems: HashMap<String, ProblemInfo>,
    /// problem id -> problem set id
    problem_sets_by_problem: HashMap<String, String>,
    problem_sets: HashMap<String, ProblemSet>,
    user_grades: HashMap<String, String>,
    feature_rows: HashMap<String, FeatureRow>,
    /// problem set id -> (user id, plan)
    plans: HashMap<String, (String, GenerationPlan)>,
}

/// In-process store for tests and local runs without MongoDB.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_problem_set(&self, set: ProblemSet) {
        self.inner.write().await.problem_sets.insert(set.id.clone(), set);
    }

    pub async fn insert_problem(&self, problem_set_id: &str, problem: ProblemInfo) {
        let mut inner = self.inner.write().await;
        inner
            .problem_sets_by_problem
            .insert(problem.id.clone(), problem_set_id.to_string());
        inner.problems.insert(problem.id.clone(), problem);
    }

    pub async fn insert_attempt(&self, attempt: SolveAttempt) {
        self.inner
            .write()
            .await
            .attempts
            .insert(attempt.id.clone(), attempt);
    }

    /// Replaces the step at the same index, mirroring the (attempt, index) key.
    pub async fn upsert_step(&self, attempt_id: &str, step: SolveStep) {
        let mut inner = self.inner.write().await;
        let steps = inner.steps.entry(attempt_id.to_string()).or_default();
        match steps.iter_mut().find(|s| s.step_index == step.step_index) {
            Some(existing) => *existing = step,
            None => steps.push(step),
        }
    }

    pub async fn push_event(&self, attempt_id: &str, event: SolveEvent) {
        self.inner
            .write()
            .await
            .events
            .entry(attempt_id.to_string())
            .or_default()
            .push(event);
    }

    /// Validates a raw event before appending it.
    pub async fn record_raw_event(&self, attempt_id: &str, raw: RawSolveEvent) -> AnalysisResult<()> {
        let event = SolveEvent::try_from(raw)?;
        self.push_event(attempt_id, event).await;
        Ok(())
    }

    pub async fn set_user_grade(&self, user_id: &str, grade: &str) {
        self.inner
            .write()
            .await
            .user_grades
            .insert(user_id.to_string(), grade.to_string());
    }

    pub async fn plan_count_for_user(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .await
            .plans
            .values()
            .filter(|(owner, _)| owner == user_id)
            .count()
    }
}

fn with_grade(inner: &Inner, set: &ProblemSet) -> ProblemSet {
    let mut set = set.clone();
    if set.user_grade.is_none() {
        set.user_grade = inner.user_grades.get(&set.user_id).cloned();
    }
    set
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn load_attempt_bundle(&self, attempt_id: &str) -> AnalysisResult<AttemptBundle> {
        let inner = self.inner.read().await;
        let attempt = inner
            .attempts
            .get(attempt_id)
            .cloned()
            .ok_or_else(|| AnalysisError::not_found("attempt", attempt_id))?;
        let problem = inner.problems.get(&attempt.problem_id).cloned();
        Ok(AttemptBundle {
            steps: inner.steps.get(attempt_id).cloned().unwrap_or_default(),
            events: inner.events.get(attempt_id).cloned().unwrap_or_default(),
            attempt,
            problem,
        })
    }

    async fn find_user_history(
        &self,
        user_id: &str,
        tags: &ProblemTags,
        before: DateTime<Utc>,
        exclude_attempt_id: &str,
    ) -> AnalysisResult<Vec<HistoricalAttempt>> {
        let inner = self.inner.read().await;
        let mut history: Vec<HistoricalAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.id != exclude_attempt_id && a.started_at < before)
            .filter(|a| {
                inner
                    .problems
                    .get(&a.problem_id)
                    .is_some_and(|p| p.tags.shares_area(tags))
            })
            .map(|a| HistoricalAttempt {
                attempt_id: a.id.clone(),
                started_at: a.started_at,
                first_input_at: a.first_input_at,
                outcome: a.outcome,
            })
            .collect();
        history.sort_by_key(|h| h.started_at);
        Ok(history)
    }

    async fn load_problem_set(&self, problem_set_id: &str) -> AnalysisResult<ProblemSet> {
        let inner = self.inner.read().await;
        inner
            .problem_sets
            .get(problem_set_id)
            .map(|set| with_grade(&inner, set))
            .ok_or_else(|| AnalysisError::not_found("problem set", problem_set_id))
    }

    async fn list_set_attempts(&self, problem_set_id: &str) -> AnalysisResult<Vec<SolveAttempt>> {
        let inner = self.inner.read().await;
        let mut attempts: Vec<SolveAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.problem_set_id == problem_set_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(attempts)
    }

    async fn list_set_problems(&self, problem_set_id: &str) -> AnalysisResult<Vec<ProblemInfo>> {
        let inner = self.inner.read().await;
        let mut problems: Vec<ProblemInfo> = inner
            .problem_sets_by_problem
            .iter()
            .filter(|(_, set_id)| set_id.as_str() == problem_set_id)
            .filter_map(|(problem_id, _)| inner.problems.get(problem_id).cloned())
            .collect();
        problems.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(problems)
    }

    async fn list_attempt_rows(&self, problem_set_id: &str) -> AnalysisResult<Vec<FeatureRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<FeatureRow> = inner
            .feature_rows
            .values()
            .filter(|r| r.scope == FeatureScope::Attempt && r.problem_set_id == problem_set_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn load_feature_row(&self, row_id: &str) -> AnalysisResult<Option<FeatureRow>> {
        Ok(self.inner.read().await.feature_rows.get(row_id).cloned())
    }

    async fn upsert_feature_row(&self, row: &FeatureRow) -> AnalysisResult<()> {
        self.inner
            .write()
            .await
            .feature_rows
            .insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn latest_completed_set(&self, user_id: &str) -> AnalysisResult<Option<ProblemSet>> {
        let inner = self.inner.read().await;
        Ok(inner
            .problem_sets
            .values()
            .filter(|s| s.user_id == user_id && s.status == ProblemSetStatus::Completed)
            .max_by_key(|s| s.created_at)
            .map(|set| with_grade(&inner, set)))
    }

    async fn list_graded_attempts(
        &self,
        user_id: &str,
        problem_set_id: Option<&str>,
    ) -> AnalysisResult<Vec<GradedAttempt>> {
        let inner = self.inner.read().await;
        let mut attempts: Vec<&SolveAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .filter(|a| problem_set_id.is_none_or(|set_id| a.problem_set_id == set_id))
            .collect();
        attempts.sort_by_key(|a| a.started_at);
        Ok(attempts
            .into_iter()
            .map(|a| GradedAttempt {
                is_correct: a.is_correct(),
                tags: inner
                    .problems
                    .get(&a.problem_id)
                    .map(|p| p.tags.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn replace_active_plan(
        &self,
        user_id: &str,
        problem_set_id: &str,
        plan: &GenerationPlan,
    ) -> AnalysisResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .plans
            .retain(|set_id, (owner, _)| owner != user_id || set_id == problem_set_id);
        inner.plans.insert(
            problem_set_id.to_string(),
            (user_id.to_string(), plan.clone()),
        );
        Ok(())
    }

    async fn load_plan(&self, problem_set_id: &str) -> AnalysisResult<Option<GenerationPlan>> {
        Ok(self
            .inner
            .read()
            .await
            .plans
            .get(problem_set_id)
            .map(|(_, plan)| plan.clone()))
    }

    async fn complete_problem_set(
        &self,
        problem_set_id: &str,
        diagnosis_text: &str,
    ) -> AnalysisResult<()> {
        let mut inner = self.inner.write().await;
        let set = inner
            .problem_sets
            .get_mut(problem_set_id)
            .ok_or_else(|| AnalysisError::not_found("problem set", problem_set_id))?;
        set.diagnosis_text = Some(diagnosis_text.to_string());
        set.status = ProblemSetStatus::Completed;
        set.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn ping(&self) -> AnalysisResult<()> {
        Ok(())
    }
}
