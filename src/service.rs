use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{FractureError, Result};
use crate::mapping::BodyPart;
use crate::pipeline::{PredictionPipeline, PredictionResult};
use crate::preprocess::ImageRef;

/// Async front for the blocking pipeline.
///
/// Requests run on tokio's blocking pool, at most `max_workers` at a time.
/// The pipeline enforces its own deadline, so a request that runs out of
/// time fails with `Timeout` before anything is written to the cache.
#[derive(Clone)]
pub struct FractureService {
    pipeline: Arc<PredictionPipeline>,
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl fmt::Debug for FractureService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FractureService")
            .field("max_workers", &self.max_workers)
            .field("available", &self.workers.available_permits())
            .finish()
    }
}

impl FractureService {
    pub fn new(pipeline: PredictionPipeline, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            pipeline: Arc::new(pipeline),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn pipeline(&self) -> &PredictionPipeline {
        &self.pipeline
    }

    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&PredictionPipeline) -> Result<T> + Send + 'static,
    {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FractureError::InvalidInput("service is shut down".into()))?;
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job(&pipeline)
        })
        .await
        .map_err(|e| FractureError::Inference(format!("worker failed: {e}")))?
    }

    pub async fn classify_part(&self, image: ImageRef) -> Result<BodyPart> {
        self.run(move |p| p.classify_part(&image)).await
    }

    pub async fn classify_fracture(&self, image: ImageRef, part: BodyPart) -> Result<PredictionResult> {
        self.run(move |p| p.classify_fracture(&image, part)).await
    }

    pub async fn analyze(&self, image: ImageRef) -> Result<PredictionResult> {
        self.run(move |p| p.analyze(&image)).await
    }

    /// Analyses every image concurrently; results come back in input order.
    pub async fn analyze_many(&self, images: Vec<ImageRef>) -> Vec<Result<PredictionResult>> {
        let mut set = JoinSet::new();
        let total = images.len();
        for (idx, image) in images.into_iter().enumerate() {
            let service = self.clone();
            set.spawn(async move { (idx, service.analyze(image).await) });
        }

        let mut results: Vec<Option<Result<PredictionResult>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => debug!(error = %e, "analysis task aborted"),
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(FractureError::Inference("analysis task aborted".into()))))
            .collect()
    }
}
