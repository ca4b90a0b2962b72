use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::services::assistant_client::{AssistantBackend, AssistantRunner, OpenAiAssistantClient};
use crate::services::feature_pipeline::FeaturePipeline;
use crate::services::llm_features::LlmFeatureAdapter;
use crate::services::report_builder::ReportNarrator;
use crate::store::AnalysisStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AnalysisStore>,
    pub pipeline: FeaturePipeline,
    /// Cancelled on shutdown so in-flight assistant runs stop polling.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the pipeline against the OpenAI assistants API when a key is configured.
    pub fn new(config: Config, store: Arc<dyn AnalysisStore>) -> anyhow::Result<Self> {
        let backend: Option<Arc<dyn AssistantBackend>> = if config.llm.is_configured() {
            let client =
                OpenAiAssistantClient::new(&config.llm).context("Failed to build assistant client")?;
            Some(Arc::new(client))
        } else {
            tracing::warn!("OPENAI_API_KEY not set; assistant features and reports disabled");
            None
        };
        Ok(Self::with_backend(config, store, backend))
    }

    pub fn with_backend(
        config: Config,
        store: Arc<dyn AnalysisStore>,
        backend: Option<Arc<dyn AssistantBackend>>,
    ) -> Self {
        let mut pipeline = FeaturePipeline::new(store.clone(), config.analysis.clone());

        if let Some(backend) = backend {
            let runner = AssistantRunner::new(backend, &config.llm);
            if let Some(assistant_id) = &config.llm.feature_assistant_id {
                pipeline = pipeline.with_llm_features(LlmFeatureAdapter::new(runner.clone(), assistant_id));
            }
            if let Some(assistant_id) = &config.llm.report_assistant_id {
                pipeline = pipeline.with_narrator(ReportNarrator::new(runner, assistant_id));
            }
        }

        Self {
            config,
            store,
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }
}

pub mod assistant_client;
pub mod feature_context;
pub mod feature_extractor;
pub mod feature_pipeline;
pub mod history_lookback;
pub mod llm_features;
pub mod plan_weighter;
pub mod report_builder;
pub mod set_aggregator;
