use crate::models::attempt::HistoricalAttempt;
use crate::models::feature::{FeatureId, FeatureVector};
use crate::services::feature_context::FeatureContext;
use crate::utils::stats::{clamp, mean};

/// Past attempts that count for the current one: other attempts started strictly earlier.
fn earlier<'a>(
    ctx: &'a FeatureContext,
    history: &'a [HistoricalAttempt],
) -> impl Iterator<Item = &'a HistoricalAttempt> + 'a {
    history.iter().filter(move |past| {
        past.attempt_id != ctx.attempt_id && past.started_at.timestamp_millis() < ctx.start_ms
    })
}

/// Accuracy over earlier same-area attempts with a final outcome.
pub fn prior_knowledge_utilization(
    ctx: &FeatureContext,
    history: &[HistoricalAttempt],
) -> Option<f64> {
    let outcomes: Vec<f64> = earlier(ctx, history)
        .filter_map(|past| past.outcome.filter(|o| o.is_resolved()))
        .map(|outcome| if outcome.is_correct() { 1.0 } else { 0.0 })
        .collect();
    mean(&outcomes).map(clamp)
}

/// Average past first-input delay divided by the current one.
pub fn response_speed_change(ctx: &FeatureContext, history: &[HistoricalAttempt]) -> Option<f64> {
    let current = ctx.first_input_delay_ms().filter(|delay| *delay > 0)?;
    let past_delays: Vec<f64> = earlier(ctx, history)
        .filter_map(|past| {
            past.first_input_at
                .map(|first| (first - past.started_at).num_milliseconds())
        })
        .filter(|delay| *delay >= 0)
        .map(|delay| delay as f64)
        .collect();
    let average = mean(&past_delays)?;
    Some(clamp(average / current as f64))
}

/// Fills the two lookback slots in place.
pub fn apply_lookback(features: &mut FeatureVector, ctx: &FeatureContext, history: &[HistoricalAttempt]) {
    if let Some(value) = prior_knowledge_utilization(ctx, history) {
        features.set(FeatureId::PriorKnowledgeUtilization, value);
    }
    if let Some(value) = response_speed_change(ctx, history) {
        features.set(FeatureId::ResponseSpeedChange, value);
    }
}
