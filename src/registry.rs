//! Lazily loaded classifiers under a residency cap.
//!
//! The deployment target only has memory for one ResNet50 at a time, so the
//! registry unloads everything resident before it loads a different model.
//! Load and evict happen under one lock; inference on a handle that has
//! already been returned does not.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ModelArtifacts;
use crate::error::{FractureError, Result};
use crate::model::{ModelHandle, ModelLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelRole {
    Parts,
    Elbow,
    Hand,
    Shoulder,
}

impl ModelRole {
    pub const ALL: [ModelRole; 4] = [
        ModelRole::Parts,
        ModelRole::Elbow,
        ModelRole::Hand,
        ModelRole::Shoulder,
    ];

    /// Case-insensitive lookup; anything unrecognised means the part classifier.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "elbow" => ModelRole::Elbow,
            "hand" => ModelRole::Hand,
            "shoulder" => ModelRole::Shoulder,
            _ => ModelRole::Parts,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelRole::Parts => "Parts",
            ModelRole::Elbow => "Elbow",
            ModelRole::Hand => "Hand",
            ModelRole::Shoulder => "Shoulder",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ModelRole::from_name(s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub loads: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Residency {
    resident: Vec<(ModelRole, ModelHandle)>,
    stats: RegistryStats,
}

pub struct ModelRegistry {
    weights_dir: PathBuf,
    artifacts: ModelArtifacts,
    residency_cap: usize,
    loader: Box<dyn ModelLoader>,
    slot: Mutex<Residency>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("weights_dir", &self.weights_dir)
            .field("residency_cap", &self.residency_cap)
            .field("resident", &self.resident_roles())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(
        weights_dir: impl Into<PathBuf>,
        artifacts: ModelArtifacts,
        residency_cap: usize,
        loader: Box<dyn ModelLoader>,
    ) -> Self {
        Self {
            weights_dir: weights_dir.into(),
            artifacts,
            residency_cap: residency_cap.max(1),
            loader,
            slot: Mutex::new(Residency::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Residency> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn artifact_path(&self, role: ModelRole) -> PathBuf {
        self.weights_dir.join(self.artifacts.file_for(role))
    }

    pub fn weights_dir(&self) -> &Path {
        &self.weights_dir
    }

    /// Returns the model for `role`, loading it (and evicting whatever is
    /// resident when the cap is reached) if needed. Blocking.
    #[instrument(skip(self), fields(cap = self.residency_cap))]
    pub fn get_model(&self, role: ModelRole) -> Result<ModelHandle> {
        let mut slot = self.lock();
        if let Some((_, handle)) = slot.resident.iter().find(|(r, _)| *r == role) {
            debug!("model already resident");
            return Ok(handle.clone());
        }

        let path = self.artifact_path(role);
        if !path.is_file() {
            return Err(FractureError::ModelLoad {
                role,
                path,
                reason: "weights artifact not found".into(),
            });
        }

        if slot.resident.len() >= self.residency_cap {
            let evicted: Vec<ModelRole> = slot.resident.drain(..).map(|(r, _)| r).collect();
            slot.stats.evictions += evicted.len() as u64;
            info!(?evicted, "evicting resident models");
        }

        let t = std::time::Instant::now();
        let handle = self.loader.load(role, &path)?;
        slot.stats.loads += 1;
        slot.resident.push((role, handle.clone()));
        info!(path = %path.display(), elapsed = ?t.elapsed(), "model loaded");
        Ok(handle)
    }

    /// Unloads every resident model.
    pub fn evict_all(&self) {
        let mut slot = self.lock();
        let n = slot.resident.len() as u64;
        if n > 0 {
            slot.resident.clear();
            slot.stats.evictions += n;
            debug!(evicted = n, "released all models");
        }
    }

    pub fn resident_count(&self) -> usize {
        self.lock().resident.len()
    }

    pub fn resident_roles(&self) -> Vec<ModelRole> {
        self.lock().resident.iter().map(|(r, _)| *r).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Classifier;
    use crate::preprocess::ImageTensor;
    use ndarray::{arr1, Array1};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Dummy {
        dropped: Arc<AtomicUsize>,
    }

    impl Classifier for Dummy {
        fn infer(&self, _input: &ImageTensor) -> Result<Array1<f32>> {
            Ok(arr1(&[0.5, 0.5]))
        }
    }

    impl Drop for Dummy {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DummyLoader {
        dropped: Arc<AtomicUsize>,
    }

    impl ModelLoader for DummyLoader {
        fn load(&self, _role: ModelRole, _path: &Path) -> Result<ModelHandle> {
            Ok(Arc::new(Dummy {
                dropped: self.dropped.clone(),
            }))
        }
    }

    fn registry(dir: &Path, cap: usize) -> (ModelRegistry, Arc<AtomicUsize>) {
        let artifacts = ModelArtifacts::default();
        for role in ModelRole::ALL {
            std::fs::write(dir.join(artifacts.file_for(role)), b"weights").unwrap();
        }
        let dropped = Arc::new(AtomicUsize::new(0));
        let loader = DummyLoader {
            dropped: dropped.clone(),
        };
        (
            ModelRegistry::new(dir, artifacts, cap, Box::new(loader)),
            dropped,
        )
    }

    #[test]
    fn unknown_role_falls_back_to_parts() {
        assert_eq!(ModelRole::from_name("Knee"), ModelRole::Parts);
        assert_eq!(ModelRole::from_name("hand"), ModelRole::Hand);
        assert_eq!("Shoulder".parse::<ModelRole>().unwrap(), ModelRole::Shoulder);
    }

    #[test]
    fn second_role_evicts_first() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, dropped) = registry(dir.path(), 1);

        let elbow = registry.get_model(ModelRole::Elbow).unwrap();
        assert_eq!(registry.resident_count(), 1);
        drop(elbow);

        let _hand = registry.get_model(ModelRole::Hand).unwrap();
        assert_eq!(registry.resident_count(), 1);
        assert_eq!(registry.resident_roles(), vec![ModelRole::Hand]);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                loads: 2,
                evictions: 1
            }
        );
    }

    #[test]
    fn resident_role_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(dir.path(), 1);
        registry.get_model(ModelRole::Parts).unwrap();
        registry.get_model(ModelRole::Parts).unwrap();
        assert_eq!(registry.stats().loads, 1);
    }

    #[test]
    fn larger_cap_keeps_models_warm() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(dir.path(), 2);
        registry.get_model(ModelRole::Parts).unwrap();
        registry.get_model(ModelRole::Hand).unwrap();
        assert_eq!(registry.resident_count(), 2);
        registry.get_model(ModelRole::Elbow).unwrap();
        assert_eq!(registry.resident_count(), 1);
        registry.evict_all();
        assert_eq!(registry.resident_count(), 0);
    }

    #[test]
    fn missing_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = Arc::new(AtomicUsize::new(0));
        let registry = ModelRegistry::new(
            dir.path(),
            ModelArtifacts::default(),
            1,
            Box::new(DummyLoader { dropped }),
        );
        let Err(err) = registry.get_model(ModelRole::Shoulder) else {
            panic!("expected ModelLoad for a missing artifact");
        };
        assert!(matches!(
            err,
            FractureError::ModelLoad {
                role: ModelRole::Shoulder,
                ..
            }
        ));
        assert_eq!(registry.resident_count(), 0);
    }

    #[test]
    fn concurrent_requests_never_exceed_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(dir.path(), 1);
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let role = ModelRole::ALL[i % 4];
                    registry.get_model(role).unwrap();
                    assert!(registry.resident_count() <= 1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.resident_count() <= 1);
    }
}
