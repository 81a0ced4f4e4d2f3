use brandmorph_contracts::runs::state::FatalStage;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors allowed to cross the pipeline boundary. Everything else degrades.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("asset validation failed for {role}: {reason}")]
    InvalidAsset { role: String, reason: String },

    #[error("packaging failed: {0}")]
    Packaging(String),
}

impl PipelineError {
    pub fn invalid_asset(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAsset {
            role: role.into(),
            reason: reason.into(),
        }
    }

    pub fn packaging(reason: impl Into<String>) -> Self {
        Self::Packaging(reason.into())
    }

    pub fn stage(&self) -> FatalStage {
        match self {
            Self::InvalidAsset { .. } => FatalStage::AssetValidation,
            Self::Packaging(_) => FatalStage::Packaging,
        }
    }
}

/// Internal signal for a stage that fell back instead of failing. Never
/// returned to callers; runs record it and continue.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} degraded: {reason}")]
pub struct DegradedCapability {
    pub stage: &'static str,
    pub reason: String,
}

impl DegradedCapability {
    pub fn new(stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}
