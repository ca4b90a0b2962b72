use serde::Deserialize;
use std::env;

use crate::services::feature_extractor::GiveUpChurn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub feature_assistant_id: Option<String>,
    pub report_assistant_id: Option<String>,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_attempts: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            feature_assistant_id: None,
            report_assistant_id: None,
            poll_interval_ms: 500,
            timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub giveup_churn: GiveUpChurn,
    pub plan_total_items: u32,
    pub plan_min_weight: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            giveup_churn: GiveUpChurn::EditEvents,
            plan_total_items: 12,
            plan_min_weight: 0.1,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let config_builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "feedflow".to_string());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: settings
                .get_string("llm.api_key")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok()
                .and_then(non_empty),
            base_url: settings
                .get_string("llm.base_url")
                .or_else(|_| env::var("OPENAI_BASE_URL"))
                .unwrap_or(defaults.base_url),
            feature_assistant_id: settings
                .get_string("llm.feature_assistant_id")
                .or_else(|_| env::var("OPENAI_ASSISTANT_ID_FEATURE_EXTRACT"))
                .ok()
                .and_then(non_empty),
            report_assistant_id: settings
                .get_string("llm.report_assistant_id")
                .or_else(|_| env::var("OPENAI_ASSISTANT_ID_REPORT"))
                .ok()
                .and_then(non_empty),
            poll_interval_ms: settings
                .get_int("llm.poll_interval_ms")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.poll_interval_ms),
            timeout_secs: settings
                .get_int("llm.timeout_secs")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.timeout_secs),
            max_attempts: settings
                .get_int("llm.max_attempts")
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.max_attempts),
        };

        let analysis_defaults = AnalysisConfig::default();
        let giveup_churn = match settings.get_string("analysis.giveup_churn") {
            Ok(value) => match value.trim() {
                "edit_events" => GiveUpChurn::EditEvents,
                "step_scale" => GiveUpChurn::StepScale,
                other => {
                    return Err(config::ConfigError::Message(format!(
                        "analysis.giveup_churn must be edit_events or step_scale, got '{}'",
                        other
                    )))
                }
            },
            Err(_) => analysis_defaults.giveup_churn,
        };
        let plan_min_weight = match settings.get_float("analysis.plan_min_weight") {
            Ok(weight) if weight.is_finite() && weight >= 0.0 => weight,
            Ok(weight) => {
                return Err(config::ConfigError::Message(format!(
                    "analysis.plan_min_weight must be a non-negative number, got {}",
                    weight
                )))
            }
            Err(_) => analysis_defaults.plan_min_weight,
        };
        let analysis = AnalysisConfig {
            giveup_churn,
            plan_total_items: settings
                .get_int("analysis.plan_total_items")
                .map(|v| v.max(1) as u32)
                .unwrap_or(analysis_defaults.plan_total_items),
            plan_min_weight,
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            bind_addr,
            llm,
            analysis,
        })
    }

    /// Configuration for tests and local runs: no database, no assistant.
    pub fn local() -> Self {
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "feedflow_test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            llm: LlmConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn load_reads_app_prefixed_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__ANALYSIS__GIVEUP_CHURN", "step_scale");
        env::set_var("APP__ANALYSIS__PLAN_TOTAL_ITEMS", "8");
        env::set_var("APP__LLM__POLL_INTERVAL_MS", "250");

        let config = Config::load().unwrap();
        assert_eq!(config.analysis.giveup_churn, GiveUpChurn::StepScale);
        assert_eq!(config.analysis.plan_total_items, 8);
        assert_eq!(config.llm.poll_interval_ms, 250);

        env::remove_var("APP__ANALYSIS__GIVEUP_CHURN");
        env::remove_var("APP__ANALYSIS__PLAN_TOTAL_ITEMS");
        env::remove_var("APP__LLM__POLL_INTERVAL_MS");
        env::remove_var("SKIP_ROOT_ENV");
    }

    #[test]
    #[serial_test::serial]
    fn unknown_churn_mode_is_rejected() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__ANALYSIS__GIVEUP_CHURN", "sometimes");
        assert!(Config::load().is_err());
        env::remove_var("APP__ANALYSIS__GIVEUP_CHURN");
        env::remove_var("SKIP_ROOT_ENV");
    }

    #[test]
    #[serial_test::serial]
    fn negative_min_weight_is_rejected() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__ANALYSIS__PLAN_MIN_WEIGHT", "-0.5");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("plan_min_weight"));

        env::set_var("APP__ANALYSIS__PLAN_MIN_WEIGHT", "0.25");
        assert_eq!(Config::load().unwrap().analysis.plan_min_weight, 0.25);

        env::remove_var("APP__ANALYSIS__PLAN_MIN_WEIGHT");
        env::remove_var("SKIP_ROOT_ENV");
    }

    #[test]
    fn local_config_has_defaults() {
        let config = Config::local();
        assert_eq!(config.llm.poll_interval_ms, 500);
        assert_eq!(config.analysis.plan_min_weight, 0.1);
        assert!(!config.llm.is_configured());
    }
}
