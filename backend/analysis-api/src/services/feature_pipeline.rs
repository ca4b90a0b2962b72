//! Orchestrates attempt feature computation, set aggregation, plan rebuilds
//! and the report hand-off for one problem set.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::metrics::record_feature_computation;
use crate::models::feature::{FeatureRow, FeatureScope};
use crate::models::plan::GenerationPlan;
use crate::models::report::ReportInput;
use crate::models::ProblemSetStatus;
use crate::services::feature_context::FeatureContext;
use crate::services::feature_extractor::{FeatureExtractor, CORE_MODEL_VERSION};
use crate::services::history_lookback::apply_lookback;
use crate::services::llm_features::{LlmFeatureAdapter, LLM_MODEL_VERSION};
use crate::services::plan_weighter::build_adaptive_plan;
use crate::services::report_builder::{self, ReportNarrator};
use crate::services::set_aggregator::{aggregate, build_set_row, set_row_id};
use crate::store::AnalysisStore;
use crate::utils::retry::{retry_async_if, RetryPolicy};

/// Outcome of one set run, returned to the HTTP caller.
#[derive(Debug, Clone, Serialize)]
pub struct SetProcessingSummary {
    pub problem_set_id: String,
    pub attempts_total: usize,
    pub attempts_processed: usize,
    pub failed_attempts: Vec<String>,
    pub set_row: FeatureRow,
    pub plan: GenerationPlan,
    pub report: ReportInput,
    pub diagnosis: Option<String>,
}

#[derive(Clone)]
pub struct FeaturePipeline {
    store: Arc<dyn AnalysisStore>,
    extractor: FeatureExtractor,
    llm_features: Option<LlmFeatureAdapter>,
    narrator: Option<ReportNarrator>,
    settings: AnalysisConfig,
    store_retry: RetryPolicy,
}

impl FeaturePipeline {
    pub fn new(store: Arc<dyn AnalysisStore>, settings: AnalysisConfig) -> Self {
        Self {
            store,
            extractor: FeatureExtractor::new(settings.giveup_churn),
            llm_features: None,
            narrator: None,
            settings,
            store_retry: RetryPolicy::for_store(),
        }
    }

    pub fn with_llm_features(mut self, adapter: LlmFeatureAdapter) -> Self {
        self.llm_features = Some(adapter);
        self
    }

    pub fn with_narrator(mut self, narrator: ReportNarrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Full recompute of one attempt row: core slots, lookback slots, then
    /// whatever the feature assistant supplies on top.
    pub async fn compute_attempt_features(
        &self,
        attempt_id: &str,
        cancel: &CancellationToken,
    ) -> AnalysisResult<FeatureRow> {
        let started = Instant::now();
        let result = self.attempt_row(attempt_id, cancel).await;
        record_feature_computation("attempt", result.is_ok(), started);
        result
    }

    async fn attempt_row(&self, attempt_id: &str, cancel: &CancellationToken) -> AnalysisResult<FeatureRow> {
        let bundle = self.store.load_attempt_bundle(attempt_id).await?;
        let ctx = FeatureContext::from_bundle(&bundle);
        let mut features = self.extractor.extract(&ctx);
        debug!(attempt_id, slots = features.len(), "Core features extracted");

        if let Some(problem) = bundle.problem.as_ref().filter(|p| p.tags.has_area()) {
            let history = self
                .store
                .find_user_history(
                    &bundle.attempt.user_id,
                    &problem.tags,
                    bundle.attempt.started_at,
                    &bundle.attempt.id,
                )
                .await?;
            apply_lookback(&mut features, &ctx, &history);
        }

        let mut model_version = CORE_MODEL_VERSION.to_string();
        if let Some(adapter) = &self.llm_features {
            let supplied = adapter.supply(&bundle, cancel).await;
            if !supplied.is_empty() {
                features.apply_supplied(&supplied);
                model_version = format!("{}+{}", CORE_MODEL_VERSION, LLM_MODEL_VERSION);
            }
        }

        let row = FeatureRow {
            id: bundle.attempt.id.clone(),
            scope: FeatureScope::Attempt,
            user_id: bundle.attempt.user_id.clone(),
            problem_set_id: bundle.attempt.problem_set_id.clone(),
            problem_id: Some(bundle.attempt.problem_id.clone()),
            attempt_id: Some(bundle.attempt.id.clone()),
            model_version,
            features,
            computed_at: Utc::now(),
        };
        self.upsert(&row).await?;

        info!(
            attempt_id,
            problem_set_id = %row.problem_set_id,
            slots = row.features.len(),
            model_version = %row.model_version,
            "Attempt features stored"
        );
        Ok(row)
    }

    /// Recomputes the set row from the stored attempt rows and raw outcomes.
    pub async fn aggregate_set(&self, problem_set_id: &str) -> AnalysisResult<FeatureRow> {
        let started = Instant::now();
        let result = self.set_row(problem_set_id).await;
        record_feature_computation("set", result.is_ok(), started);
        result
    }

    async fn set_row(&self, problem_set_id: &str) -> AnalysisResult<FeatureRow> {
        let set = self.store.load_problem_set(problem_set_id).await?;
        let rows = self.store.list_attempt_rows(problem_set_id).await?;
        let attempts = self.store.list_set_attempts(problem_set_id).await?;

        let row = build_set_row(&set, aggregate(&rows, &attempts));
        self.upsert(&row).await?;

        info!(
            problem_set_id,
            attempt_rows = rows.len(),
            slots = row.features.len(),
            "Set features stored"
        );
        Ok(row)
    }

    /// Rebuilds the user's plan from graded history and makes it the only
    /// active plan of that user. `total_items` defaults to the configured size.
    pub async fn rebuild_plan(
        &self,
        user_id: &str,
        problem_set_id: &str,
        total_items: Option<u32>,
    ) -> AnalysisResult<GenerationPlan> {
        let plan = build_adaptive_plan(
            self.store.as_ref(),
            user_id,
            total_items.unwrap_or(self.settings.plan_total_items),
            self.settings.plan_min_weight,
        )
        .await?;
        self.store.replace_active_plan(user_id, problem_set_id, &plan).await?;
        Ok(plan)
    }

    /// Active plan of a set, if one has been stored.
    pub async fn load_plan(&self, problem_set_id: &str) -> AnalysisResult<Option<GenerationPlan>> {
        self.store.load_problem_set(problem_set_id).await?;
        self.store.load_plan(problem_set_id).await
    }

    pub async fn build_report_input(&self, problem_set_id: &str) -> AnalysisResult<ReportInput> {
        let set = self.store.load_problem_set(problem_set_id).await?;
        let set_row = self
            .store
            .load_feature_row(&set_row_id(problem_set_id))
            .await?
            .ok_or_else(|| AnalysisError::not_found("set feature row", problem_set_id))?;
        let problems = self.store.list_set_problems(problem_set_id).await?;
        let attempts = self.store.list_set_attempts(problem_set_id).await?;
        Ok(report_builder::build_report_input(&set, &set_row.features, &problems, &attempts))
    }

    /// End-of-set workflow. Individual attempt failures are logged and
    /// skipped; store failures on the set itself abort the run.
    pub async fn process_problem_set(
        &self,
        problem_set_id: &str,
        plan_total_items: Option<u32>,
        cancel: &CancellationToken,
    ) -> AnalysisResult<SetProcessingSummary> {
        let set = self.store.load_problem_set(problem_set_id).await?;
        info!(problem_set_id, user_id = %set.user_id, "Processing problem set");

        let plan = self.rebuild_plan(&set.user_id, &set.id, plan_total_items).await?;

        let attempts = self.store.list_set_attempts(problem_set_id).await?;
        let mut failed_attempts = Vec::new();
        for attempt in &attempts {
            if cancel.is_cancelled() {
                warn!(problem_set_id, "Set processing cancelled");
                return Err(AnalysisError::Cancelled);
            }
            if let Err(err) = self.compute_attempt_features(&attempt.id, cancel).await {
                error!(
                    problem_set_id,
                    attempt_id = %attempt.id,
                    error = %err,
                    "Attempt feature computation failed"
                );
                failed_attempts.push(attempt.id.clone());
            }
        }

        let set_row = self.aggregate_set(problem_set_id).await?;
        let problems = self.store.list_set_problems(problem_set_id).await?;
        let report = report_builder::build_report_input(&set, &set_row.features, &problems, &attempts);

        let diagnosis = match &self.narrator {
            Some(narrator) => match narrator.narrate(&report, cancel).await {
                Ok(text) => {
                    self.store.complete_problem_set(problem_set_id, &text).await?;
                    Some(text)
                }
                Err(err) => {
                    warn!(problem_set_id, error = %err, "Diagnosis narrative unavailable");
                    None
                }
            },
            None => {
                debug!(problem_set_id, "No report assistant configured");
                None
            }
        };

        let status = if diagnosis.is_some() {
            ProblemSetStatus::Completed
        } else {
            set.status
        };
        info!(
            problem_set_id,
            attempts = attempts.len(),
            failed = failed_attempts.len(),
            status = status.as_str(),
            "Problem set processed"
        );

        Ok(SetProcessingSummary {
            problem_set_id: set.id,
            attempts_total: attempts.len(),
            attempts_processed: attempts.len() - failed_attempts.len(),
            failed_attempts,
            set_row,
            plan,
            report,
            diagnosis,
        })
    }

    async fn upsert(&self, row: &FeatureRow) -> AnalysisResult<()> {
        retry_async_if(
            self.store_retry.clone(),
            "feature row upsert",
            |err: &AnalysisError| matches!(err, AnalysisError::Store(_)),
            || self.store.upsert_feature_row(row),
        )
        .await
    }
}
