//! Decode -> part classification -> fracture classification -> cache.
//!
//! Each request runs synchronously on the caller's thread. Part
//! classification is served from the cache when the same bytes were seen
//! before; fracture classification always recomputes so the overlay and
//! the full verdict are available.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::{ResultCache, ResultStore};
use crate::config::EngineConfig;
use crate::error::{FractureError, Result};
use crate::explain::{overlay_file_name, ExplanationEngine};
use crate::fusion::{ConfidenceTier, FusionSignals, Verdict};
use crate::heuristics::Heuristics;
use crate::mapping::{reference_case, BodyPart, ReferenceCase};
use crate::model::{ModelLoader, OnnxModel};
use crate::postprocess::argmax_and_max;
use crate::preprocess::{edge_discontinuity_boost, ImageCodec, ImageRef, SourceImage};
use crate::registry::{ModelRegistry, ModelRole};

pub const DISCLAIMER: &str = "Research Prototype - Not a Diagnostic Tool";

/// Output index of the "fractured" class in every fracture classifier.
const FRACTURED_INDEX: usize = 0;

/// Argmax of the fracture classifier, before any fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractureLabel {
    Fractured,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub verdict: Verdict,
    pub fracture_detected: bool,
    pub adjusted_probability: f32,
    pub confidence_tier: ConfidenceTier,
    pub safety_message: String,
    pub explanation_image_path: Option<PathBuf>,
    pub anatomical_location: String,
    pub reference_case: ReferenceCase,
    pub raw_model_label: FractureLabel,
    pub raw_probability: f32,
    pub part: BodyPart,
    pub disclaimer: String,
    pub analyzed_at: DateTime<Utc>,
}

struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    fn check(&self, stage: &str) -> Result<()> {
        if self.start.elapsed() > self.limit {
            warn!(stage, limit = ?self.limit, "request deadline exceeded");
            return Err(FractureError::Timeout(self.limit));
        }
        Ok(())
    }
}

pub struct PredictionPipeline {
    codec: ImageCodec,
    registry: ModelRegistry,
    cache: Arc<dyn ResultStore>,
    explainer: ExplanationEngine,
    heuristics: Heuristics,
    part_classes: Vec<BodyPart>,
    output_dir: Option<PathBuf>,
    deadline: Duration,
}

impl std::fmt::Debug for PredictionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionPipeline")
            .field("registry", &self.registry)
            .field("heuristics", &self.heuristics)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PredictionPipeline {
    pub fn new(config: EngineConfig, loader: Box<dyn ModelLoader>, cache: Arc<dyn ResultStore>) -> Self {
        let registry = ModelRegistry::new(
            config.weights_dir.clone(),
            config.artifacts.clone(),
            config.residency_cap,
            loader,
        );
        Self {
            codec: ImageCodec::new(config.preprocess),
            registry,
            cache,
            explainer: ExplanationEngine::new(config.gradcam_layer, config.overlay_alpha),
            heuristics: Heuristics::new(config.heuristic_corroboration),
            part_classes: config.part_classes,
            output_dir: config.output_dir,
            deadline: config.deadline,
        }
    }

    /// ONNX Runtime models and the SQLite cache named in `config`. A cache
    /// that cannot be opened is replaced by an in-memory one.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let cache: Arc<dyn ResultStore> = match ResultCache::open(&config.cache_path) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(path = %config.cache_path.display(), error = %e, "result cache unavailable, using memory");
                Arc::new(ResultCache::in_memory()?)
            }
        };
        let loader = Box::new(OnnxModel::new(config.use_cuda));
        Ok(Self::new(config, loader, cache))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ResultStore> {
        &self.cache
    }

    fn cached_part(&self, source: &SourceImage) -> Option<BodyPart> {
        match self.cache.lookup(Some(&source.content_key), Some(&source.name)) {
            Ok(Some(record)) => record.part_result.and_then(|p| p.parse().ok()),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cache lookup failed");
                None
            }
        }
    }

    fn store(&self, source: &SourceImage, part: Option<&str>, fracture: Option<&str>) {
        if let Err(e) = self
            .cache
            .upsert(&source.name, &source.content_key, part, fracture)
        {
            warn!(error = %e, key = %source.content_key, "cache write failed");
        }
    }

    fn part_from_probabilities(&self, probs: &Array1<f32>) -> Result<BodyPart> {
        if probs.len() != self.part_classes.len() {
            return Err(FractureError::Inference(format!(
                "part classifier returned {} classes, expected {}",
                probs.len(),
                self.part_classes.len()
            )));
        }
        let (idx, confidence) = argmax_and_max(probs);
        let part = self.part_classes[idx];
        debug!(%part, confidence, "part classifier");
        Ok(part)
    }

    /// Body part shown in the radiograph.
    #[instrument(skip_all, fields(image = %image.display_name()))]
    pub fn classify_part(&self, image: &ImageRef) -> Result<BodyPart> {
        let deadline = Deadline::start(self.deadline);
        let source = self.codec.load(image)?;

        if let Some(part) = self.cached_part(&source) {
            debug!(%part, "part served from cache");
            return Ok(part);
        }

        let tensor = self.codec.tensor(&source.image)?;
        deadline.check("preprocess")?;

        let model = self.registry.get_model(ModelRole::Parts)?;
        let probs = model.infer(&tensor)?;
        deadline.check("inference")?;

        let raw = self.part_from_probabilities(&probs)?;
        let part = self
            .heuristics
            .override_part(raw, &source.name, Some(source.aspect_ratio()));
        if part != raw {
            info!(%raw, %part, "part label overridden");
        }

        deadline.check("cache")?;
        self.store(&source, Some(part.as_str()), None);
        Ok(part)
    }

    fn overlay_path(&self, image: &ImageRef, adjusted_probability: f32, name: &str) -> PathBuf {
        let dir = self
            .output_dir
            .clone()
            .or_else(|| image.source_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(std::env::temp_dir);
        dir.join(overlay_file_name(adjusted_probability, name))
    }

    /// Fused, safety-gated fracture verdict for an image of `part`.
    #[instrument(skip_all, fields(image = %image.display_name(), part = %part))]
    pub fn classify_fracture(&self, image: &ImageRef, part: BodyPart) -> Result<PredictionResult> {
        let deadline = Deadline::start(self.deadline);
        let source = self.codec.load(image)?;
        let tensor = self.codec.tensor(&source.image)?;
        deadline.check("preprocess")?;

        let model = self.registry.get_model(part.fracture_model())?;
        let probs = model.infer(&tensor)?;
        deadline.check("inference")?;
        if probs.len() != 2 {
            return Err(FractureError::Inference(format!(
                "fracture classifier returned {} classes, expected 2",
                probs.len()
            )));
        }

        let signals = FusionSignals {
            raw_probability: probs[FRACTURED_INDEX],
            keyword_boost: self.heuristics.keyword_boost(&source.name),
            edge_boost: edge_discontinuity_boost(&source.image),
            pattern_boost: self.heuristics.pattern_boost(&source.name),
        };
        let fused = signals.fuse();
        let verdict = fused.verdict;
        info!(?signals, adjusted = fused.adjusted_probability, verdict = verdict.as_str(), "fracture verdict");

        let t = Instant::now();
        let heatmap = self.explainer.heatmap(&tensor, model.as_ref(), FRACTURED_INDEX);
        drop(model);
        self.registry.evict_all();
        deadline.check("explanation")?;

        let explanation_image_path = heatmap.and_then(|heatmap| {
            let path = self.overlay_path(image, fused.adjusted_probability, &source.name);
            self.explainer.overlay(&source.image, &heatmap, &path)
        });
        debug!(elapsed = ?t.elapsed(), "explanation");

        deadline.check("cache")?;
        self.store(&source, None, Some(verdict.cache_label()));

        let raw_model_label = if argmax_and_max(&probs).0 == FRACTURED_INDEX {
            FractureLabel::Fractured
        } else {
            FractureLabel::Normal
        };

        Ok(PredictionResult {
            verdict,
            fracture_detected: verdict.fracture_detected(),
            adjusted_probability: fused.adjusted_probability,
            confidence_tier: verdict.tier(),
            safety_message: verdict.safety_message().to_string(),
            explanation_image_path,
            anatomical_location: part.anatomical_location().to_string(),
            reference_case: reference_case(part, verdict.fracture_detected()),
            raw_model_label,
            raw_probability: signals.raw_probability,
            part,
            disclaimer: DISCLAIMER.to_string(),
            analyzed_at: Utc::now(),
        })
    }

    /// Part classification followed by fracture classification.
    pub fn analyze(&self, image: &ImageRef) -> Result<PredictionResult> {
        let part = self.classify_part(image)?;
        self.classify_fracture(image, part)
    }
}
