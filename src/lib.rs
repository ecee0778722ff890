pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod explain;
pub mod fusion;
pub mod heuristics;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod registry;
pub mod service;
pub mod utils;

pub use crate::cache::{CacheRecord, ResultCache, ResultStore};
pub use crate::cli::Args;
pub use crate::config::EngineConfig;
pub use crate::error::{FractureError, Result};
pub use crate::evaluate::{evaluate, EvaluationReport};
pub use crate::fusion::{fuse_confidence, ConfidenceTier, FusedConfidence, Verdict};
pub use crate::mapping::{load_class_mapping, BodyPart};
pub use crate::model::{Classifier, ModelLoader, OnnxModel};
pub use crate::pipeline::{PredictionPipeline, PredictionResult};
pub use crate::preprocess::{ImageRef, PreprocessConfig};
pub use crate::registry::{ModelRegistry, ModelRole};
pub use crate::service::FractureService;
