use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, AnalysisResult};
use crate::metrics::record_llm_call;
use crate::models::attempt::SolveAttempt;
use crate::models::feature::FeatureVector;
use crate::models::report::{GroupKey, QuestionSummary, ReportInput};
use crate::models::{ProblemInfo, ProblemSet};
use crate::services::assistant_client::AssistantRunner;
use crate::services::llm_features::assistant_failure;
use crate::utils::stats::mean;

/// Mean of the present member slots per group; 0 for a group with none present.
pub fn group_scores(features: &FeatureVector) -> BTreeMap<GroupKey, f64> {
    GroupKey::ALL
        .iter()
        .map(|group| {
            let present: Vec<f64> = group
                .members()
                .iter()
                .filter_map(|id| features.get(*id))
                .collect();
            (*group, mean(&present).unwrap_or(0.0))
        })
        .collect()
}

/// One summary per problem in creation order. Correctness comes from the
/// earliest attempt on that problem; no attempt counts as incorrect.
pub fn question_summaries(problems: &[ProblemInfo], attempts: &[SolveAttempt]) -> Vec<QuestionSummary> {
    problems
        .iter()
        .enumerate()
        .map(|(position, problem)| {
            let is_correct = attempts
                .iter()
                .filter(|a| a.problem_id == problem.id)
                .min_by_key(|a| a.started_at)
                .is_some_and(|a| a.is_correct());
            QuestionSummary {
                number: position as u32 + 1,
                problem_id: problem.id.clone(),
                learning_stage: problem.tags.learning_stage,
                evaluation_area: problem.tags.evaluation_area,
                content_area: problem.tags.content_area,
                difficulty: problem.tags.difficulty,
                is_correct,
            }
        })
        .collect()
}

pub fn build_report_input(
    set: &ProblemSet,
    features: &FeatureVector,
    problems: &[ProblemInfo],
    attempts: &[SolveAttempt],
) -> ReportInput {
    ReportInput {
        problem_set_id: set.id.clone(),
        user_id: set.user_id.clone(),
        user_grade: set.user_grade.clone(),
        feature_values: features.to_slot_map(),
        group_scores: group_scores(features),
        questions: question_summaries(problems, attempts),
    }
}

/// Hands a report input to the report assistant and returns its narrative.
#[derive(Clone)]
pub struct ReportNarrator {
    runner: AssistantRunner,
    assistant_id: String,
}

impl ReportNarrator {
    pub fn new(runner: AssistantRunner, assistant_id: impl Into<String>) -> Self {
        Self {
            runner,
            assistant_id: assistant_id.into(),
        }
    }

    pub async fn narrate(&self, input: &ReportInput, cancel: &CancellationToken) -> AnalysisResult<String> {
        let message = serde_json::to_string(input)
            .map_err(|e| AnalysisError::ExternalService(e.to_string()))?;
        let result = self.runner.run(&self.assistant_id, &message, cancel).await;
        record_llm_call("report", if result.is_ok() { "completed" } else { "failed" });
        let text = result.map_err(assistant_failure)?;
        Ok(text.trim().to_string())
    }
}
