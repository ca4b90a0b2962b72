use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ProblemInfo;
use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    InProgress,
    Correct,
    Incorrect,
    GaveUp,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::InProgress => "in_progress",
            AttemptOutcome::Correct => "correct",
            AttemptOutcome::Incorrect => "incorrect",
            AttemptOutcome::GaveUp => "gave_up",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(AttemptOutcome::InProgress),
            "correct" => Some(AttemptOutcome::Correct),
            "incorrect" => Some(AttemptOutcome::Incorrect),
            "gave_up" => Some(AttemptOutcome::GaveUp),
            _ => None,
        }
    }

    /// Anything past `in_progress` counts as a final outcome.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, AttemptOutcome::InProgress)
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, AttemptOutcome::Correct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveAttempt {
    pub id: String,
    pub user_id: String,
    pub problem_id: String,
    pub problem_set_id: String,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub first_input_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
    pub expected_score: Option<f64>,
    pub self_confidence: Option<f64>,
    pub attempt_count: u32,
}

impl SolveAttempt {
    pub fn resolved_outcome(&self) -> Option<AttemptOutcome> {
        self.outcome.filter(AttemptOutcome::is_resolved)
    }

    pub fn is_correct(&self) -> bool {
        self.outcome.is_some_and(|o| o.is_correct())
    }
}

/// One editable step slot, keyed by (attempt, step index). Never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveStep {
    pub step_index: i32,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintType {
    Concept,
    Procedure,
    Calc,
    Other,
}

impl HintType {
    pub const ALL: [HintType; 4] = [
        HintType::Concept,
        HintType::Procedure,
        HintType::Calc,
        HintType::Other,
    ];

    pub fn from_payload(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("concept") => HintType::Concept,
            Some("procedure") => HintType::Procedure,
            Some("calc") => HintType::Calc,
            _ => HintType::Other,
        }
    }
}

/// Closed set of event tags. Only tags that carry data have a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveEventKind {
    ProblemViewed,
    FirstInput,
    KeyInput,
    StepCreated,
    StepUpdated,
    StepDeleted,
    HintClick { hint_type: HintType },
    FocusIn,
    FocusOut,
    StrategyReset,
    EvalResult { selected_option: Option<String> },
    SubmitClick,
    GiveUp,
}

impl SolveEventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            SolveEventKind::ProblemViewed => "PROBLEM_VIEWED",
            SolveEventKind::FirstInput => "FIRST_INPUT",
            SolveEventKind::KeyInput => "KEY_INPUT",
            SolveEventKind::StepCreated => "STEP_CREATED",
            SolveEventKind::StepUpdated => "STEP_UPDATED",
            SolveEventKind::StepDeleted => "STEP_DELETED",
            SolveEventKind::HintClick { .. } => "HINT_CLICK",
            SolveEventKind::FocusIn => "FOCUS_IN",
            SolveEventKind::FocusOut => "FOCUS_OUT",
            SolveEventKind::StrategyReset => "STRATEGY_RESET",
            SolveEventKind::EvalResult { .. } => "EVAL_RESULT",
            SolveEventKind::SubmitClick => "SUBMIT_CLICK",
            SolveEventKind::GiveUp => "GIVE_UP",
        }
    }

    /// Builds a typed kind from a stored tag and its free-form payload.
    pub fn from_tag(tag: &str, payload: Option<&serde_json::Value>) -> AnalysisResult<Self> {
        let kind = match tag {
            "PROBLEM_VIEWED" => SolveEventKind::ProblemViewed,
            "FIRST_INPUT" => SolveEventKind::FirstInput,
            "KEY_INPUT" => SolveEventKind::KeyInput,
            "STEP_CREATED" => SolveEventKind::StepCreated,
            "STEP_UPDATED" => SolveEventKind::StepUpdated,
            "STEP_DELETED" => SolveEventKind::StepDeleted,
            "HINT_CLICK" => SolveEventKind::HintClick {
                hint_type: HintType::from_payload(
                    payload
                        .and_then(|p| p.get("hint_type"))
                        .and_then(|v| v.as_str()),
                ),
            },
            "FOCUS_IN" => SolveEventKind::FocusIn,
            "FOCUS_OUT" => SolveEventKind::FocusOut,
            "STRATEGY_RESET" => SolveEventKind::StrategyReset,
            "EVAL_RESULT" => SolveEventKind::EvalResult {
                selected_option: payload.and_then(selected_option),
            },
            "SUBMIT_CLICK" => SolveEventKind::SubmitClick,
            "GIVE_UP" => SolveEventKind::GiveUp,
            other => {
                return Err(AnalysisError::MalformedEvent(format!(
                    "unknown event type '{}'",
                    other
                )))
            }
        };
        Ok(kind)
    }

    pub fn is_hint(&self) -> bool {
        matches!(self, SolveEventKind::HintClick { .. })
    }
}

fn selected_option(payload: &serde_json::Value) -> Option<String> {
    let value = payload
        .get("selectedOption")
        .or_else(|| payload.get("selected_option"))
        .or_else(|| payload.get("option"))?;
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveEvent {
    pub kind: SolveEventKind,
    pub step_index: Option<i32>,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl SolveEvent {
    pub fn new(kind: SolveEventKind, client_timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            kind,
            step_index: None,
            client_timestamp,
            server_timestamp: None,
        }
    }

    /// Client time is authoritative; the server time is only a fallback.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.client_timestamp.or(self.server_timestamp)
    }
}

/// An event as it arrives at the store boundary, before tag validation.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawSolveEvent {
    #[validate(length(min = 1, max = 32))]
    pub event_type: String,
    #[validate(range(min = 0, max = 10_000))]
    pub step_index: Option<i32>,
    pub payload: Option<serde_json::Value>,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<RawSolveEvent> for SolveEvent {
    type Error = AnalysisError;

    fn try_from(raw: RawSolveEvent) -> Result<Self, Self::Error> {
        raw.validate()
            .map_err(|e| AnalysisError::MalformedEvent(e.to_string()))?;
        let kind = SolveEventKind::from_tag(raw.event_type.trim(), raw.payload.as_ref())?;
        Ok(SolveEvent {
            kind,
            step_index: raw.step_index,
            client_timestamp: raw.client_timestamp,
            server_timestamp: raw.server_timestamp,
        })
    }
}

/// One attempt with everything the extractor and the LLM adapter read.
#[derive(Debug, Clone)]
pub struct AttemptBundle {
    pub attempt: SolveAttempt,
    pub steps: Vec<SolveStep>,
    pub events: Vec<SolveEvent>,
    pub problem: Option<ProblemInfo>,
}

/// A past attempt used by the historical lookback slots.
#[derive(Debug, Clone)]
pub struct HistoricalAttempt {
    pub attempt_id: String,
    pub started_at: DateTime<Utc>,
    pub first_input_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
}
