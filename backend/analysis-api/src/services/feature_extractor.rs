//! Core per-attempt slots.
//!
//! Each slot has exactly one guard function returning `Option<f64>`. `None`
//! means the precondition events were absent and the slot stays null; it is
//! never coerced to zero. Values that come back are already clamped.

use serde::{Deserialize, Serialize};

use crate::models::attempt::{AttemptOutcome, HintType, SolveEventKind};
use crate::models::feature::{FeatureId, FeatureVector};
use crate::services::feature_context::FeatureContext;
use crate::utils::stats::{clamp, consecutive_gaps, mean, population_std_dev, variation};

pub const CORE_MODEL_VERSION: &str = "analysis_rs_v1_raw";

/// How the pre-giveup churn slot is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpChurn {
    /// (step updates + step deletes) / step count
    #[default]
    EditEvents,
    /// step count / 10
    StepScale,
}

const STEP_SCALE_DIVISOR: f64 = 10.0;

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    churn: GiveUpChurn,
}

impl FeatureExtractor {
    pub fn new(churn: GiveUpChurn) -> Self {
        Self { churn }
    }

    /// Computes every core slot whose preconditions hold. Lookback slots are
    /// filled separately because they need the store.
    pub fn extract(&self, ctx: &FeatureContext) -> FeatureVector {
        let mut features = FeatureVector::new();
        let slots: [(FeatureId, Option<f64>); 13] = [
            (FeatureId::InitialDeliberation, initial_deliberation(ctx)),
            (FeatureId::FirstHintTiming, first_hint_timing(ctx)),
            (FeatureId::HintTypeSkew, hint_type_skew(ctx)),
            (FeatureId::StepIntervalVariability, step_interval_variability(ctx)),
            (FeatureId::PostCompletionReflection, post_completion_reflection(ctx)),
            (FeatureId::SelfCorrectionFrequency, self_correction_frequency(ctx)),
            (FeatureId::PreGiveUpChurn, pre_giveup_churn(ctx, self.churn)),
            (FeatureId::UnnecessaryInput, unnecessary_input(ctx)),
            (FeatureId::MetacognitiveAlignment, metacognitive_misalignment(ctx)),
            (FeatureId::HintResilience, hint_resilience(ctx)),
            (FeatureId::InputRhythmInstability, input_rhythm_instability(ctx)),
            (FeatureId::LongestInactivity, longest_inactivity(ctx)),
            (FeatureId::PostTriggerLatency, post_trigger_latency(ctx)),
        ];
        for (id, value) in slots {
            if let Some(value) = value {
                features.set(id, value);
            }
        }
        features
    }
}

fn is_key_input(kind: &SolveEventKind) -> bool {
    matches!(kind, SolveEventKind::KeyInput)
}

fn is_step_edit(kind: &SolveEventKind) -> bool {
    matches!(kind, SolveEventKind::StepUpdated | SolveEventKind::StepDeleted)
}

pub fn initial_deliberation(ctx: &FeatureContext) -> Option<f64> {
    let first_input = ctx.first_input_ms?;
    Some(ctx.ratio_to_duration(ctx.start_ms, first_input))
}

/// Earliest hint relative to the session. A submitted attempt without any
/// hint scores 1.
pub fn first_hint_timing(ctx: &FeatureContext) -> Option<f64> {
    ctx.submit_ms?;
    if !ctx.hint_used {
        return Some(1.0);
    }
    let earliest = ctx.timestamps_where(SolveEventKind::is_hint).into_iter().min()?;
    Some(ctx.ratio_to_duration(ctx.start_ms, earliest))
}

pub fn hint_type_skew(ctx: &FeatureContext) -> Option<f64> {
    let mut counts = [0usize; HintType::ALL.len()];
    let mut total = 0usize;
    for event in &ctx.events {
        if let SolveEventKind::HintClick { hint_type } = &event.kind {
            if let Some(slot) = HintType::ALL.iter().position(|h| h == hint_type) {
                counts[slot] += 1;
                total += 1;
            }
        }
    }
    if total == 0 {
        return None;
    }
    let max = counts.iter().copied().max().unwrap_or(0);
    Some(clamp(max as f64 / total as f64))
}

/// Std-dev of step creation gaps relative to total duration.
pub fn step_interval_variability(ctx: &FeatureContext) -> Option<f64> {
    if ctx.steps.len() < 2 {
        return None;
    }
    let mut created: Vec<i64> = ctx.steps.iter().map(|s| s.created_ms).collect();
    created.sort_unstable();
    let gaps = consecutive_gaps(&created);
    let std_dev = population_std_dev(&gaps)?;
    Some(clamp(std_dev / ctx.duration_ms as f64))
}

pub fn post_completion_reflection(ctx: &FeatureContext) -> Option<f64> {
    let submit = ctx.submit_ms?;
    let last_key = ctx.timestamps_where(is_key_input).into_iter().max();
    let last_update = ctx.steps.iter().map(|s| s.updated_ms).max();
    let last_activity = last_key.into_iter().chain(last_update).max()?;
    Some(ctx.ratio_to_duration(last_activity, submit))
}

pub fn self_correction_frequency(ctx: &FeatureContext) -> Option<f64> {
    if ctx.steps.is_empty() {
        return None;
    }
    let edits = ctx.count_where(is_step_edit);
    Some(clamp(edits as f64 / ctx.steps.len() as f64))
}

pub fn pre_giveup_churn(ctx: &FeatureContext, churn: GiveUpChurn) -> Option<f64> {
    if ctx.outcome != Some(AttemptOutcome::GaveUp) {
        return None;
    }
    match churn {
        GiveUpChurn::EditEvents => {
            if ctx.steps.is_empty() {
                return None;
            }
            let edits = ctx.count_where(is_step_edit);
            Some(clamp(edits as f64 / ctx.steps.len() as f64))
        }
        GiveUpChurn::StepScale => Some(clamp(ctx.steps.len() as f64 / STEP_SCALE_DIVISOR)),
    }
}

pub fn unnecessary_input(ctx: &FeatureContext) -> Option<f64> {
    if ctx.steps.is_empty() {
        return None;
    }
    let deleted = ctx.steps.iter().filter(|s| s.deleted).count();
    Some(clamp(deleted as f64 / ctx.steps.len() as f64))
}

/// Stored in risk polarity: `|actual - expected/100|`. Set aggregation inverts it.
pub fn metacognitive_misalignment(ctx: &FeatureContext) -> Option<f64> {
    let outcome = ctx.resolved_outcome()?;
    let expected = ctx.expected_score?;
    let actual = if outcome.is_correct() { 1.0 } else { 0.0 };
    Some(clamp((actual - expected / 100.0).abs()))
}

/// 0 when a hint was used and the attempt ended correct, 1 otherwise.
pub fn hint_resilience(ctx: &FeatureContext) -> Option<f64> {
    let outcome = ctx.resolved_outcome()?;
    let recovered = ctx.hint_used && outcome.is_correct();
    Some(if recovered { 0.0 } else { 1.0 })
}

pub fn input_rhythm_instability(ctx: &FeatureContext) -> Option<f64> {
    let keys = ctx.timestamps_where(is_key_input);
    if keys.len() < 2 {
        return None;
    }
    Some(variation(&consecutive_gaps(&keys)))
}

/// Longest FOCUS_OUT to next FOCUS_IN gap. An unpaired FOCUS_OUT is closed by
/// the submission.
pub fn longest_inactivity(ctx: &FeatureContext) -> Option<f64> {
    let submit = ctx.submit_ms?;
    let focus: Vec<(bool, i64)> = ctx
        .events
        .iter()
        .filter_map(|event| match event.kind {
            SolveEventKind::FocusOut => event.at_ms.map(|at| (true, at)),
            SolveEventKind::FocusIn => event.at_ms.map(|at| (false, at)),
            _ => None,
        })
        .collect();

    let mut longest: Option<i64> = None;
    for (position, (is_out, out_at)) in focus.iter().enumerate() {
        if !is_out {
            continue;
        }
        let back_at = focus[position + 1..]
            .iter()
            .find(|(is_out, _)| !is_out)
            .map(|(_, at)| *at)
            .unwrap_or(submit);
        let gap = back_at - out_at;
        longest = Some(longest.map_or(gap, |current| current.max(gap)));
    }
    longest.map(|gap| clamp(gap as f64 / ctx.duration_ms as f64))
}

/// Mean delay from each hint or evaluation result to the next key input.
pub fn post_trigger_latency(ctx: &FeatureContext) -> Option<f64> {
    let keys = ctx.timestamps_where(is_key_input);
    if keys.is_empty() {
        return None;
    }
    let triggers = ctx.timestamps_where(|kind| {
        matches!(
            kind,
            SolveEventKind::HintClick { .. } | SolveEventKind::EvalResult { .. }
        )
    });
    let delays: Vec<f64> = triggers
        .iter()
        .filter_map(|trigger| {
            keys.iter()
                .find(|key| **key > *trigger)
                .map(|key| (key - trigger) as f64)
        })
        .collect();
    let average = mean(&delays)?;
    Some(clamp(average / ctx.duration_ms as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attempt::{AttemptBundle, SolveAttempt, SolveEvent, SolveStep};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 14, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn attempt() -> SolveAttempt {
        SolveAttempt {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            problem_id: "p1".to_string(),
            problem_set_id: "s1".to_string(),
            started_at: t0(),
            submitted_at: Some(secs(120)),
            first_input_at: Some(secs(30)),
            outcome: Some(AttemptOutcome::Correct),
            expected_score: Some(80.0),
            self_confidence: None,
            attempt_count: 1,
        }
    }

    fn step(index: i32, created: i64, updated: i64, deleted: bool) -> SolveStep {
        SolveStep {
            step_index: index,
            content: format!("step {}", index),
            is_deleted: deleted,
            created_at: secs(created),
            updated_at: secs(updated),
        }
    }

    fn event(kind: SolveEventKind, at: i64) -> SolveEvent {
        SolveEvent::new(kind, Some(secs(at)))
    }

    fn hint(hint_type: HintType, at: i64) -> SolveEvent {
        event(SolveEventKind::HintClick { hint_type }, at)
    }

    fn context(attempt: SolveAttempt, steps: Vec<SolveStep>, events: Vec<SolveEvent>) -> FeatureContext {
        FeatureContext::from_bundle(&AttemptBundle {
            attempt,
            steps,
            events,
            problem: None,
        })
    }

    #[test]
    fn reference_attempt_values() {
        let ctx = context(attempt(), vec![step(0, 40, 60, false)], vec![]);
        let features = FeatureExtractor::default().extract(&ctx);

        assert_eq!(features.get(FeatureId::InitialDeliberation), Some(0.25));
        assert_eq!(features.get(FeatureId::FirstHintTiming), Some(1.0));
        let misalignment = features.get(FeatureId::MetacognitiveAlignment).unwrap();
        assert!((misalignment - 0.2).abs() < 1e-9);
        assert_eq!(features.get(FeatureId::HintResilience), Some(1.0));
        assert_eq!(features.get(FeatureId::UnnecessaryInput), Some(0.0));
        assert_eq!(features.get(FeatureId::HintTypeSkew), None);
        assert_eq!(features.get(FeatureId::StepIntervalVariability), None);
    }

    #[test]
    fn empty_attempt_yields_only_defined_defaults() {
        let mut bare = attempt();
        bare.submitted_at = None;
        bare.first_input_at = None;
        bare.outcome = Some(AttemptOutcome::InProgress);
        bare.expected_score = None;
        let features = FeatureExtractor::default().extract(&context(bare, vec![], vec![]));
        assert!(features.is_empty());
    }

    #[test]
    fn hint_timing_uses_earliest_hint() {
        let ctx = context(
            attempt(),
            vec![],
            vec![hint(HintType::Concept, 90), hint(HintType::Calc, 60)],
        );
        assert_eq!(first_hint_timing(&ctx), Some(0.5));
    }

    #[test]
    fn hint_timing_absent_when_hints_are_untimed() {
        let untimed = SolveEvent::new(
            SolveEventKind::HintClick {
                hint_type: HintType::Concept,
            },
            None,
        );
        let ctx = context(attempt(), vec![], vec![untimed]);
        assert!(ctx.hint_used);
        assert_eq!(first_hint_timing(&ctx), None);

        let features = FeatureExtractor::default().extract(&ctx);
        assert_eq!(features.get(FeatureId::FirstHintTiming), None);
    }

    #[test]
    fn hint_timing_needs_submit() {
        let mut open = attempt();
        open.submitted_at = None;
        assert_eq!(first_hint_timing(&context(open, vec![], vec![])), None);
    }

    #[test]
    fn hint_skew_is_max_share() {
        let ctx = context(
            attempt(),
            vec![],
            vec![
                hint(HintType::Concept, 10),
                hint(HintType::Concept, 20),
                hint(HintType::Procedure, 30),
                hint(HintType::Other, 40),
            ],
        );
        assert_eq!(hint_type_skew(&ctx), Some(0.5));
    }

    #[test]
    fn step_interval_variability_is_relative_to_duration() {
        // gaps 12s and 36s: population std-dev 12s over 120s
        let steps = vec![step(0, 0, 0, false), step(1, 12, 12, false), step(2, 48, 48, false)];
        let value = step_interval_variability(&context(attempt(), steps, vec![])).unwrap();
        assert!((value - 0.1).abs() < 1e-9);
    }

    #[test]
    fn reflection_uses_latest_activity() {
        let ctx = context(
            attempt(),
            vec![step(0, 10, 60, false)],
            vec![event(SolveEventKind::KeyInput, 90)],
        );
        assert_eq!(post_completion_reflection(&ctx), Some(0.25));
    }

    #[test]
    fn reflection_without_activity_is_absent() {
        assert_eq!(post_completion_reflection(&context(attempt(), vec![], vec![])), None);
    }

    #[test]
    fn self_correction_counts_updates_and_deletes() {
        let ctx = context(
            attempt(),
            vec![step(0, 1, 1, false), step(1, 2, 2, true)],
            vec![
                event(SolveEventKind::StepUpdated, 5),
                event(SolveEventKind::StepDeleted, 6),
                event(SolveEventKind::StepUpdated, 7),
            ],
        );
        assert_eq!(self_correction_frequency(&ctx), Some(1.0));
        assert_eq!(unnecessary_input(&ctx), Some(0.5));
    }

    #[test]
    fn churn_only_for_gave_up() {
        let steps = vec![step(0, 1, 1, false), step(1, 2, 2, false), step(2, 3, 3, false), step(3, 4, 4, false)];
        let events = vec![event(SolveEventKind::StepUpdated, 5)];
        let correct = context(attempt(), steps.clone(), events.clone());
        assert_eq!(pre_giveup_churn(&correct, GiveUpChurn::EditEvents), None);

        let mut gave_up = attempt();
        gave_up.outcome = Some(AttemptOutcome::GaveUp);
        let ctx = context(gave_up, steps, events);
        assert_eq!(pre_giveup_churn(&ctx, GiveUpChurn::EditEvents), Some(0.25));
        assert_eq!(pre_giveup_churn(&ctx, GiveUpChurn::StepScale), Some(0.4));
    }

    #[test]
    fn resilience_is_favourable_only_after_hint_and_correct() {
        let ctx = context(attempt(), vec![], vec![hint(HintType::Calc, 10)]);
        assert_eq!(hint_resilience(&ctx), Some(0.0));

        let mut wrong = attempt();
        wrong.outcome = Some(AttemptOutcome::Incorrect);
        let ctx = context(wrong, vec![], vec![hint(HintType::Calc, 10)]);
        assert_eq!(hint_resilience(&ctx), Some(1.0));

        let mut pending = attempt();
        pending.outcome = Some(AttemptOutcome::InProgress);
        assert_eq!(hint_resilience(&context(pending, vec![], vec![])), None);
    }

    #[test]
    fn rhythm_instability_sorts_events_first() {
        let ctx = context(
            attempt(),
            vec![],
            vec![
                event(SolveEventKind::KeyInput, 30),
                event(SolveEventKind::KeyInput, 10),
                event(SolveEventKind::KeyInput, 20),
            ],
        );
        assert_eq!(input_rhythm_instability(&ctx), Some(0.0));
    }

    #[test]
    fn unpaired_focus_out_closes_at_submit() {
        let ctx = context(
            attempt(),
            vec![],
            vec![
                event(SolveEventKind::FocusOut, 10),
                event(SolveEventKind::FocusIn, 22),
                event(SolveEventKind::FocusOut, 60),
            ],
        );
        assert_eq!(longest_inactivity(&ctx), Some(0.5));
    }

    #[test]
    fn trigger_latency_averages_next_key_delay() {
        let ctx = context(
            attempt(),
            vec![],
            vec![
                hint(HintType::Concept, 10),
                event(SolveEventKind::KeyInput, 22),
                event(
                    SolveEventKind::EvalResult {
                        selected_option: Some("2".to_string()),
                    },
                    40,
                ),
                event(SolveEventKind::KeyInput, 76),
            ],
        );
        // delays 12s and 36s
        let value = post_trigger_latency(&ctx).unwrap();
        assert!((value - 0.2).abs() < 1e-9);
    }

    #[test]
    fn extraction_is_deterministic_and_bounded() {
        let ctx = context(
            attempt(),
            vec![step(0, 5, 100, false), step(1, 7, 9, true)],
            vec![
                event(SolveEventKind::KeyInput, 500),
                event(SolveEventKind::KeyInput, -20),
                hint(HintType::Procedure, 200),
                event(SolveEventKind::FocusOut, 1),
                event(SolveEventKind::StepDeleted, 3),
            ],
        );
        let extractor = FeatureExtractor::new(GiveUpChurn::EditEvents);
        let first = extractor.extract(&ctx);
        let second = extractor.extract(&ctx);
        assert_eq!(first, second);
        for (_, value) in first.iter() {
            assert!(value.is_finite());
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
