use thiserror::Error;

/// Typed failures surfaced by the engine. Nothing here is retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("cannot compute features for {action}: degradation curve has {available} entries, need {needed}")]
    FeatureComputation {
        action: String,
        needed: usize,
        available: usize,
    },

    #[error("no model artifact loaded")]
    ModelUnavailable,

    #[error("feature length mismatch: got {got}, expected {expected}")]
    FeatureShapeMismatch { expected: usize, got: usize },

    #[error("model scoring failed: {0}")]
    Model(String),
}

impl EngineError {
    /// Only model-side failures can clear up without the caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ModelUnavailable | EngineError::FeatureShapeMismatch { .. }
        )
    }

    /// Short stable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSnapshot(_) => "invalid_snapshot",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::FeatureComputation { .. } => "feature_computation",
            EngineError::ModelUnavailable => "model_unavailable",
            EngineError::FeatureShapeMismatch { .. } => "feature_shape_mismatch",
            EngineError::Model(_) => "model_error",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
