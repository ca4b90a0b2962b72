use chrono::{DateTime, Utc};

use crate::models::attempt::{AttemptBundle, AttemptOutcome, SolveEventKind};
use crate::utils::stats::clamp;
use crate::utils::time::to_millis;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextEvent {
    pub kind: SolveEventKind,
    pub at_ms: Option<i64>,
    pub step_index: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextStep {
    pub index: i32,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub deleted: bool,
    pub content: String,
}

/// Millisecond view of one attempt. Building it never fails; missing inputs
/// surface as `None` and the extractor skips the affected slots.
#[derive(Debug, Clone)]
pub struct FeatureContext {
    pub attempt_id: String,
    pub start_ms: i64,
    pub submit_ms: Option<i64>,
    pub first_input_ms: Option<i64>,
    /// `submit - start` when submission is after start, otherwise 1.
    pub duration_ms: i64,
    /// Sorted by timestamp; untimed events keep their stored order at the end.
    pub events: Vec<ContextEvent>,
    pub steps: Vec<ContextStep>,
    pub hint_used: bool,
    pub expected_score: Option<f64>,
    pub self_confidence: Option<f64>,
    pub outcome: Option<AttemptOutcome>,
}

impl FeatureContext {
    pub fn from_bundle(bundle: &AttemptBundle) -> Self {
        let attempt = &bundle.attempt;
        let start_ms = attempt.started_at.timestamp_millis();
        let submit_ms = to_millis(attempt.submitted_at);
        let duration_ms = match submit_ms {
            Some(submit) if submit > start_ms => submit - start_ms,
            _ => 1,
        };

        let mut events: Vec<ContextEvent> = bundle
            .events
            .iter()
            .map(|event| ContextEvent {
                kind: event.kind.clone(),
                at_ms: to_millis(event.effective_timestamp()),
                step_index: event.step_index,
            })
            .collect();
        // stable: equal timestamps keep insertion order
        events.sort_by_key(|event| (event.at_ms.is_none(), event.at_ms.unwrap_or(i64::MAX)));

        let steps = bundle
            .steps
            .iter()
            .map(|step| ContextStep {
                index: step.step_index,
                created_ms: step.created_at.timestamp_millis(),
                updated_ms: step.updated_at.timestamp_millis(),
                deleted: step.is_deleted,
                content: step.content.clone(),
            })
            .collect();

        let first_input_ms = to_millis(attempt.first_input_at).or_else(|| {
            events
                .iter()
                .filter(|event| event.kind == SolveEventKind::FirstInput)
                .filter_map(|event| event.at_ms)
                .min()
        });

        let hint_used = events.iter().any(|event| event.kind.is_hint());

        Self {
            attempt_id: attempt.id.clone(),
            start_ms,
            submit_ms,
            first_input_ms,
            duration_ms,
            events,
            steps,
            hint_used,
            expected_score: attempt.expected_score,
            self_confidence: attempt.self_confidence,
            outcome: attempt.outcome,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.start_ms)
    }

    /// `clamp((to - from) / duration)`.
    pub fn ratio_to_duration(&self, from_ms: i64, to_ms: i64) -> f64 {
        clamp((to_ms - from_ms) as f64 / self.duration_ms as f64)
    }

    /// Timestamps of events matching `predicate`, ascending. Untimed events are skipped.
    pub fn timestamps_where<F>(&self, predicate: F) -> Vec<i64>
    where
        F: Fn(&SolveEventKind) -> bool,
    {
        self.events
            .iter()
            .filter(|event| predicate(&event.kind))
            .filter_map(|event| event.at_ms)
            .collect()
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SolveEventKind) -> bool,
    {
        self.events.iter().filter(|event| predicate(&event.kind)).count()
    }

    pub fn resolved_outcome(&self) -> Option<AttemptOutcome> {
        self.outcome.filter(AttemptOutcome::is_resolved)
    }

    /// Delay from start to first input, when known.
    pub fn first_input_delay_ms(&self) -> Option<i64> {
        self.first_input_ms.map(|first| first - self.start_ms)
    }
}
