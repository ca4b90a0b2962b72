use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl AnalysisError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AnalysisError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AnalysisError::NotFound { .. })
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
