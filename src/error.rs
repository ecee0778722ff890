use std::path::PathBuf;
use std::time::Duration;

use crate::registry::ModelRole;

pub type Result<T, E = FractureError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum FractureError {
    /// Image bytes could not be read or decoded.
    #[error("image decode failed for {name}: {reason}")]
    Decode { name: String, reason: String },

    /// Weights artifact for a model role is missing or unloadable.
    #[error("failed to load {role} model from {}: {reason}", path.display())]
    ModelLoad {
        role: ModelRole,
        path: PathBuf,
        reason: String,
    },

    #[error("inference engine error: {0}")]
    Inference(String),

    /// Grad-CAM could not be computed. Recovered locally by the pipeline.
    #[error("explanation unavailable: {0}")]
    ExplanationUnavailable(String),

    /// Result cache storage failure. Recovered locally by the pipeline.
    #[error("result cache error: {0}")]
    CacheIo(String),

    #[error("request exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FractureError {
    pub(crate) fn decode(name: impl Into<String>, reason: impl ToString) -> Self {
        FractureError::Decode {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ort::Error> for FractureError {
    fn from(e: ort::Error) -> Self {
        tracing::error!(error = %e, "ORT inference error");
        FractureError::Inference(e.to_string())
    }
}

impl From<rusqlite::Error> for FractureError {
    fn from(e: rusqlite::Error) -> Self {
        FractureError::CacheIo(e.to_string())
    }
}

impl From<ndarray::ShapeError> for FractureError {
    fn from(e: ndarray::ShapeError) -> Self {
        FractureError::Inference(format!("unexpected tensor shape: {e}"))
    }
}
