//! Collapses every attempt row of a problem set into one set row.
//!
//! Each slot is aggregated over the attempts where it is present, by the rule
//! returned from [`rule_for`]. Slots listed in [`RISK_FEATURES`] are then
//! flipped with `1 - v` so that higher is healthier for every stored slot.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::attempt::SolveAttempt;
use crate::models::feature::{FeatureId, FeatureRow, FeatureScope, FeatureVector};
use crate::models::ProblemSet;
use crate::utils::stats::{clamp, mean};

pub const SET_MODEL_VERSION: &str = "analysis_rs_v1_set";

/// Slots whose raw polarity is "higher is worse".
pub const RISK_FEATURES: [FeatureId; 12] = [
    FeatureId::ConceptUnderstanding,
    FeatureId::FirstHintTiming,
    FeatureId::HintTypeSkew,
    FeatureId::PostCompletionReflection,
    FeatureId::SelfCorrectionFrequency,
    FeatureId::PreGiveUpChurn,
    FeatureId::StrategySwitching,
    FeatureId::MetacognitiveAlignment,
    FeatureId::HintResilience,
    FeatureId::MisconceptionRisk,
    FeatureId::InputRhythmInstability,
    FeatureId::ResourceDependence,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationRule {
    /// Arithmetic mean of present values.
    Mean,
    /// Min-max normalize within the set, then average.
    MinMaxMean,
    /// Correct-rate change between the first and second half of the set.
    BeforeAfterSplit,
    /// Latest expected score against the overall correct rate.
    LatestComposite,
}

pub fn rule_for(id: FeatureId) -> AggregationRule {
    match id {
        FeatureId::InitialDeliberation | FeatureId::PostTriggerLatency => AggregationRule::MinMaxMean,
        FeatureId::LearningTrend => AggregationRule::BeforeAfterSplit,
        FeatureId::MetacognitiveAlignment => AggregationRule::LatestComposite,
        _ => AggregationRule::Mean,
    }
}

pub fn is_risk(id: FeatureId) -> bool {
    RISK_FEATURES.contains(&id)
}

/// `(v - min) / (max - min)` per value, averaged. All values equal gives 0.
pub fn min_max_mean(values: &[f64]) -> Option<f64> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;
    if max == min {
        return Some(0.0);
    }
    let span = max - min;
    let normalized: Vec<f64> = values.iter().map(|v| (v - min) / span).collect();
    mean(&normalized).map(clamp)
}

fn correct_rate(attempts: &[&SolveAttempt]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    attempts.iter().filter(|a| a.is_correct()).count() as f64 / attempts.len() as f64
}

/// Attempts must be ordered by start. The second half takes the extra attempt.
pub fn learning_trend(ordered: &[&SolveAttempt]) -> Option<f64> {
    if ordered.len() < 2 {
        return None;
    }
    let (first, second) = ordered.split_at(ordered.len() / 2);
    Some(clamp(0.5 + (correct_rate(second) - correct_rate(first)) / 2.0))
}

/// Raw misalignment `|expected/100 - overall_rate|` using the most recent
/// expected score. Risk inversion turns it into alignment.
pub fn metacognitive_composite(ordered: &[&SolveAttempt]) -> Option<f64> {
    let expected = ordered.iter().rev().find_map(|a| a.expected_score)?;
    let overall = correct_rate(ordered);
    Some(clamp((expected / 100.0 - overall).abs()))
}

/// Aggregates attempt rows into set-level slots, risk slots already inverted.
pub fn aggregate(rows: &[FeatureRow], attempts: &[SolveAttempt]) -> FeatureVector {
    let mut ordered: Vec<&SolveAttempt> = attempts.iter().collect();
    ordered.sort_by_key(|a| a.started_at);

    let mut features = FeatureVector::new();
    for id in FeatureId::ALL {
        let present: Vec<f64> = rows.iter().filter_map(|row| row.features.get(id)).collect();
        let value = match rule_for(id) {
            AggregationRule::Mean => mean(&present),
            AggregationRule::MinMaxMean => min_max_mean(&present),
            AggregationRule::BeforeAfterSplit => learning_trend(&ordered),
            AggregationRule::LatestComposite => metacognitive_composite(&ordered),
        };
        if let Some(value) = value {
            let stored = if is_risk(id) { 1.0 - value } else { value };
            features.set(id, clamp(stored));
        }
    }
    features
}

/// Deterministic set-row key derived from the problem set id.
pub fn set_row_id(problem_set_id: &str) -> String {
    let digest = Sha256::digest(problem_set_id.as_bytes());
    format!("set-{}", &hex::encode(digest)[..24])
}

pub fn build_set_row(set: &ProblemSet, features: FeatureVector) -> FeatureRow {
    FeatureRow {
        id: set_row_id(&set.id),
        scope: FeatureScope::Set,
        user_id: set.user_id.clone(),
        problem_set_id: set.id.clone(),
        problem_id: None,
        attempt_id: None,
        model_version: SET_MODEL_VERSION.to_string(),
        features,
        computed_at: Utc::now(),
    }
}
