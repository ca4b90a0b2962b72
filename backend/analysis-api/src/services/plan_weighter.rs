//! Next-set item distribution from per-category accuracy.
//!
//! Each of the four dimensions is apportioned independently with the
//! largest-remainder method. Ties in the remainder keep category declaration
//! order because the sort is stable.

use chrono::Utc;
use tracing::info;

use crate::error::AnalysisResult;
use crate::models::plan::{Category, CategoryCount, GenerationPlan, PlanSource};
use crate::models::{GradedAttempt, ProblemTags};
use crate::store::AnalysisStore;

pub const DEFAULT_MIN_WEIGHT: f64 = 0.1;

/// Accuracy used for a category nobody has attempted yet.
const NEUTRAL_ACCURACY: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub correct: u32,
    pub total: u32,
}

impl Tally {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            NEUTRAL_ACCURACY
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

/// Floors `total * (w / sum(w))` and hands the leftover items to the largest
/// fractional remainders. A non-positive weight sum is treated as equal weights.
pub fn largest_remainder(weights: &[f64], total_items: u32) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    let shares: Vec<f64> = if sum > 0.0 && sum.is_finite() {
        weights.iter().map(|w| f64::from(total_items) * (w / sum)).collect()
    } else {
        vec![f64::from(total_items) / weights.len() as f64; weights.len()]
    };

    let mut counts: Vec<u32> = shares.iter().map(|s| s.floor() as u32).collect();
    let assigned: u32 = counts.iter().sum();
    let mut remaining = total_items.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|a, b| {
        let ra = shares[*a] - shares[*a].floor();
        let rb = shares[*b] - shares[*b].floor();
        rb.total_cmp(&ra)
    });

    for index in order.iter().cycle() {
        if remaining == 0 {
            break;
        }
        counts[*index] += 1;
        remaining -= 1;
    }
    counts
}

/// `weight = (1 - accuracy) + min_weight` per category, then apportioned.
pub fn weights_from_accuracy<C, F>(tally_of: F, total_items: u32, min_weight: f64) -> Vec<CategoryCount<C>>
where
    C: Category,
    F: Fn(C) -> Tally,
{
    let weights: Vec<f64> = C::ALL
        .iter()
        .map(|category| (1.0 - tally_of(*category).accuracy()) + min_weight)
        .collect();
    C::ALL
        .iter()
        .zip(largest_remainder(&weights, total_items))
        .map(|(category, count)| CategoryCount {
            category: *category,
            count,
        })
        .collect()
}

/// Round-robin fill: every category gets `total / n`, the first `total % n` one more.
pub fn equal_counts<C: Category>(total_items: u32) -> Vec<CategoryCount<C>> {
    let mut counts: Vec<CategoryCount<C>> = C::ALL
        .iter()
        .map(|category| CategoryCount {
            category: *category,
            count: 0,
        })
        .collect();
    if counts.is_empty() {
        return counts;
    }
    let n = counts.len();
    for i in 0..total_items as usize {
        counts[i % n].count += 1;
    }
    counts
}

pub fn build_equal_plan(total_items: u32) -> GenerationPlan {
    GenerationPlan {
        total_items,
        learning_stage_counts: equal_counts(total_items),
        evaluation_area_counts: equal_counts(total_items),
        content_area_counts: equal_counts(total_items),
        difficulty_counts: equal_counts(total_items),
        source: PlanSource::EqualDefault,
        generated_at: Utc::now(),
    }
}

fn tally<C, G>(graded: &[GradedAttempt], category: C, tag: G) -> Tally
where
    C: Category,
    G: Fn(&ProblemTags) -> Option<C>,
{
    graded
        .iter()
        .filter(|attempt| tag(&attempt.tags) == Some(category))
        .fold(Tally::default(), |mut acc, attempt| {
            acc.total += 1;
            if attempt.is_correct {
                acc.correct += 1;
            }
            acc
        })
}

/// Equal plan when `graded` is empty, accuracy-weighted otherwise.
pub fn plan_from_history(graded: &[GradedAttempt], total_items: u32, min_weight: f64) -> GenerationPlan {
    if graded.is_empty() {
        return build_equal_plan(total_items);
    }
    GenerationPlan {
        total_items,
        learning_stage_counts: weights_from_accuracy(
            |c| tally(graded, c, |t| t.learning_stage),
            total_items,
            min_weight,
        ),
        evaluation_area_counts: weights_from_accuracy(
            |c| tally(graded, c, |t| t.evaluation_area),
            total_items,
            min_weight,
        ),
        content_area_counts: weights_from_accuracy(
            |c| tally(graded, c, |t| t.content_area),
            total_items,
            min_weight,
        ),
        difficulty_counts: weights_from_accuracy(
            |c| tally(graded, c, |t| t.difficulty),
            total_items,
            min_weight,
        ),
        source: PlanSource::AdaptiveFromAccuracy,
        generated_at: Utc::now(),
    }
}

/// Scores the user's most recently completed set, or the full history when no
/// set was completed yet. No attempts in that scope gives the equal plan.
pub async fn build_adaptive_plan(
    store: &dyn AnalysisStore,
    user_id: &str,
    total_items: u32,
    min_weight: f64,
) -> AnalysisResult<GenerationPlan> {
    let latest = store.latest_completed_set(user_id).await?;
    let scope = latest.as_ref().map(|set| set.id.as_str());
    let graded = store.list_graded_attempts(user_id, scope).await?;

    let plan = plan_from_history(&graded, total_items, min_weight);
    info!(
        user_id,
        scope = scope.unwrap_or("all"),
        attempts = graded.len(),
        source = plan.source.as_str(),
        "Generation plan built"
    );
    Ok(plan)
}
