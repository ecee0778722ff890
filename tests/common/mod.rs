#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array1, Array3};

use fracture_triage::cache::{CacheRecord, ResultCache, ResultStore};
use fracture_triage::config::EngineConfig;
use fracture_triage::error::{FractureError, Result};
use fracture_triage::model::{ActivationGradients, Classifier, ModelHandle, ModelLoader};
use fracture_triage::pipeline::PredictionPipeline;
use fracture_triage::preprocess::{ContentKey, ImageTensor};
use fracture_triage::registry::ModelRole;

/// Canned probabilities per role, with optional Grad-CAM tensors and latency.
#[derive(Clone, Default)]
pub struct FakeModels {
    pub outputs: HashMap<ModelRole, Vec<f32>>,
    pub with_gradients: bool,
    pub latency: Option<Duration>,
    pub infer_calls: Arc<AtomicUsize>,
    pub loads: Arc<AtomicUsize>,
}

impl FakeModels {
    /// Parts model says Hand; every fracture model says `p_fractured`.
    pub fn hand(p_fractured: f32) -> Self {
        let mut outputs = HashMap::new();
        outputs.insert(ModelRole::Parts, vec![0.1, 0.8, 0.1]);
        for role in [ModelRole::Elbow, ModelRole::Hand, ModelRole::Shoulder] {
            outputs.insert(role, vec![p_fractured, 1.0 - p_fractured]);
        }
        Self {
            outputs,
            ..Self::default()
        }
    }

    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }
}

struct FakeClassifier {
    probs: Vec<f32>,
    with_gradients: bool,
    latency: Option<Duration>,
    infer_calls: Arc<AtomicUsize>,
}

impl Classifier for FakeClassifier {
    fn infer(&self, _input: &ImageTensor) -> Result<Array1<f32>> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        Ok(Array1::from(self.probs.clone()))
    }

    fn activation_gradients(
        &self,
        _input: &ImageTensor,
        _layer: &str,
        _class_index: usize,
    ) -> Result<Option<ActivationGradients>> {
        if !self.with_gradients {
            return Ok(None);
        }
        let mut activations = Array3::<f32>::zeros((7, 7, 4));
        activations[[3, 3, 0]] = 1.0;
        activations[[2, 4, 1]] = 0.5;
        Ok(Some(ActivationGradients {
            activations,
            gradients: Array3::ones((7, 7, 4)),
        }))
    }
}

impl ModelLoader for FakeModels {
    fn load(&self, role: ModelRole, _path: &Path) -> Result<ModelHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let probs = self
            .outputs
            .get(&role)
            .cloned()
            .ok_or_else(|| FractureError::Inference(format!("no fake output for {role}")))?;
        Ok(Arc::new(FakeClassifier {
            probs,
            with_gradients: self.with_gradients,
            latency: self.latency,
            infer_calls: self.infer_calls.clone(),
        }))
    }
}

/// A store whose every call fails.
pub struct BrokenStore;

impl ResultStore for BrokenStore {
    fn lookup(&self, _key: Option<&ContentKey>, _name: Option<&str>) -> Result<Option<CacheRecord>> {
        Err(FractureError::CacheIo("disk full".into()))
    }

    fn upsert(&self, _name: &str, _key: &ContentKey, _part: Option<&str>, _fracture: Option<&str>) -> Result<()> {
        Err(FractureError::CacheIo("disk full".into()))
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub cache: Arc<ResultCache>,
    pub models: FakeModels,
    pub pipeline: PredictionPipeline,
}

impl Fixture {
    pub fn new(models: FakeModels) -> Self {
        Self::with_config(models, |_| {})
    }

    pub fn with_config(models: FakeModels, tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default()
            .with_weights_dir(dir.path().join("weights"))
            .with_cache_path(dir.path().join("cache.db"));
        config.output_dir = Some(dir.path().join("overlays"));
        write_weights(&config);
        std::fs::create_dir_all(dir.path().join("overlays")).unwrap();
        tweak(&mut config);

        let cache = Arc::new(ResultCache::in_memory().unwrap());
        let pipeline = PredictionPipeline::new(config, Box::new(models.clone()), cache.clone());
        Self {
            dir,
            cache,
            models,
            pipeline,
        }
    }

    /// Writes a flat grey radiograph (no edges) and returns its path.
    pub fn image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        flat_image(64, 64).save(&path).unwrap();
        path
    }

    /// Writes a fine checkerboard whose centre is dense with edges.
    pub fn textured_image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        RgbImage::from_fn(200, 200, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
        .save(&path)
        .unwrap();
        path
    }
}

pub fn write_weights(config: &EngineConfig) {
    std::fs::create_dir_all(&config.weights_dir).unwrap();
    for role in ModelRole::ALL {
        std::fs::write(config.weights_dir.join(config.artifacts.file_for(role)), b"onnx").unwrap();
    }
}

pub fn flat_image(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([128, 128, 128])))
}
