//! Engine configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mapping::BodyPart;
use crate::preprocess::PreprocessConfig;
use crate::registry::ModelRole;

/// Keras ResNet50 layer Grad-CAM reads from.
pub const DEFAULT_GRADCAM_LAYER: &str = "conv5_block3_out";

/// Weights file name for each model role, relative to the weights directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub parts: String,
    pub elbow: String,
    pub hand: String,
    pub shoulder: String,
}

impl Default for ModelArtifacts {
    fn default() -> Self {
        Self {
            parts: "ResNet50_BodyParts.onnx".into(),
            elbow: "ResNet50_Elbow_frac.onnx".into(),
            hand: "ResNet50_Hand_frac.onnx".into(),
            shoulder: "ResNet50_Shoulder_frac.onnx".into(),
        }
    }
}

impl ModelArtifacts {
    pub fn file_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Parts => &self.parts,
            ModelRole::Elbow => &self.elbow,
            ModelRole::Hand => &self.hand,
            ModelRole::Shoulder => &self.shoulder,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub weights_dir: PathBuf,
    pub artifacts: ModelArtifacts,

    /// Maximum number of models loaded at once (default: 1)
    pub residency_cap: usize,

    /// SQLite file backing the result cache
    pub cache_path: PathBuf,

    /// Directory for Grad-CAM overlays. `None` writes next to the source image,
    /// falling back to the system temp directory for in-memory images.
    pub output_dir: Option<PathBuf>,

    /// Deadline for one decode -> infer -> explain request (default: 120s)
    pub deadline: Duration,

    /// Filename-derived signals: keyword/pattern boosts and part overrides
    pub heuristic_corroboration: bool,

    pub gradcam_layer: String,

    /// Heatmap weight when blending onto the source image (default: 0.4)
    pub overlay_alpha: f32,

    pub use_cuda: bool,

    pub preprocess: PreprocessConfig,

    /// Part classifier output classes, by index
    pub part_classes: Vec<BodyPart>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("weights"),
            artifacts: ModelArtifacts::default(),
            residency_cap: 1,
            cache_path: default_cache_path(),
            output_dir: None,
            deadline: Duration::from_secs(120),
            heuristic_corroboration: true,
            gradcam_layer: DEFAULT_GRADCAM_LAYER.into(),
            overlay_alpha: 0.4,
            use_cuda: false,
            preprocess: PreprocessConfig::default(),
            part_classes: vec![BodyPart::Elbow, BodyPart::Hand, BodyPart::Shoulder],
        }
    }
}

impl EngineConfig {
    pub fn with_weights_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.weights_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_cache_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cache_path = path.as_ref().to_path_buf();
        self
    }
}

/// `<data_local_dir>/fracture-triage/image_predictions.db`, or the working
/// directory when no data directory is known.
pub fn default_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fracture-triage"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("image_predictions.db")
}
