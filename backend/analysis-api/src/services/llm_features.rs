use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::metrics::record_llm_call;
use crate::models::attempt::{AttemptBundle, SolveEventKind};
use crate::models::feature::FeatureId;
use crate::services::assistant_client::{AssistantError, AssistantRunner};
use crate::utils::stats::clamp;

pub const LLM_MODEL_VERSION: &str = "analysis_gpt_v1";

/// Slot values supplied by the assistant. `None` is an explicit null.
pub type SuppliedFeatures = BTreeMap<FeatureId, Option<f64>>;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAnswer {
    pub option: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionStep {
    pub index: i32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmFeaturePayload {
    pub problem_text: String,
    pub correct_option: String,
    pub student_answer: StudentAnswer,
    pub solution_steps: Vec<SolutionStep>,
}

/// Request body for one attempt. `None` when the problem text is unavailable.
pub fn build_payload(bundle: &AttemptBundle) -> Option<LlmFeaturePayload> {
    let problem = bundle.problem.as_ref()?;
    if problem.problem_text.trim().is_empty() {
        return None;
    }

    // latest EVAL_RESULT wins; untimed events sort first
    let selected = bundle
        .events
        .iter()
        .filter_map(|event| match &event.kind {
            SolveEventKind::EvalResult { selected_option } => {
                Some((event.effective_timestamp(), selected_option.clone()))
            }
            _ => None,
        })
        .max_by_key(|(at, _)| *at)
        .and_then(|(_, option)| option)
        .unwrap_or_default();

    let mut steps: Vec<SolutionStep> = bundle
        .steps
        .iter()
        .filter(|step| !step.is_deleted)
        .map(|step| SolutionStep {
            index: step.step_index,
            content: step.content.clone(),
        })
        .collect();
    steps.sort_by_key(|step| step.index);

    Some(LlmFeaturePayload {
        problem_text: problem.problem_text.clone(),
        correct_option: problem.correct_option.clone().unwrap_or_default(),
        student_answer: StudentAnswer {
            option: selected,
            is_correct: bundle.attempt.is_correct(),
        },
        solution_steps: steps,
    })
}

/// Numbers and numeric strings are clamped; anything else, or a non-finite number, is null.
pub fn sanitize_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then(|| clamp(number))
}

fn json_body(reply: &str) -> &str {
    match FENCED_JSON.captures(reply).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => reply.trim(),
    }
}

/// Parses an assistant reply into supplied slots. Unknown keys are dropped.
pub fn parse_feature_values(reply: &str) -> AnalysisResult<SuppliedFeatures> {
    let parsed: Value = serde_json::from_str(json_body(reply))
        .map_err(|e| AnalysisError::ExternalService(format!("unparsable assistant reply: {}", e)))?;
    let values = parsed
        .get("feature_values")
        .unwrap_or(&parsed)
        .as_object()
        .ok_or_else(|| AnalysisError::ExternalService("feature_values is not an object".to_string()))?;

    Ok(values
        .iter()
        .filter_map(|(key, value)| FeatureId::parse_key(key).map(|id| (id, sanitize_value(value))))
        .collect())
}

/// Boundary to the feature-extraction assistant. Every failure collapses to
/// "no values" so a single attempt never stops the batch.
#[derive(Clone)]
pub struct LlmFeatureAdapter {
    runner: AssistantRunner,
    assistant_id: String,
}

impl LlmFeatureAdapter {
    pub fn new(runner: AssistantRunner, assistant_id: impl Into<String>) -> Self {
        Self {
            runner,
            assistant_id: assistant_id.into(),
        }
    }

    pub async fn supply(&self, bundle: &AttemptBundle, cancel: &CancellationToken) -> SuppliedFeatures {
        let attempt_id = bundle.attempt.id.as_str();
        let Some(payload) = build_payload(bundle) else {
            info!(attempt_id, "Skipping assistant features: problem text unavailable");
            record_llm_call("features", "skipped");
            return SuppliedFeatures::new();
        };

        match self.request(&payload, cancel).await {
            Ok(values) => {
                info!(attempt_id, slots = values.len(), "Assistant features received");
                record_llm_call("features", "completed");
                values
            }
            Err(err) => {
                warn!(attempt_id, error = %err, "Assistant features unavailable");
                record_llm_call("features", "failed");
                SuppliedFeatures::new()
            }
        }
    }

    async fn request(
        &self,
        payload: &LlmFeaturePayload,
        cancel: &CancellationToken,
    ) -> AnalysisResult<SuppliedFeatures> {
        let message = serde_json::to_string(payload)
            .map_err(|e| AnalysisError::ExternalService(e.to_string()))?;
        let reply = self
            .runner
            .run(&self.assistant_id, &message, cancel)
            .await
            .map_err(assistant_failure)?;
        parse_feature_values(&reply)
    }
}

pub fn assistant_failure(err: AssistantError) -> AnalysisError {
    match err {
        AssistantError::Cancelled => AnalysisError::Cancelled,
        other => AnalysisError::ExternalService(other.to_string()),
    }
}
