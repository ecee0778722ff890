//! Grad-CAM heatmaps and their overlay on the source radiograph.
//!
//! Explanations are best effort: every failure is logged and surfaces as
//! `None`, never as an error to the caller.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{FractureError, Result};
use crate::model::{ActivationGradients, Classifier};
use crate::preprocess::ImageTensor;

/// Grad-CAM from activations and class-score gradients.
///
/// Gradients are averaged over the spatial axes into per-channel weights,
/// the weighted channel sum is clipped at zero and divided by its maximum.
pub fn grad_cam(ag: &ActivationGradients) -> Result<Array2<f32>> {
    if ag.activations.dim() != ag.gradients.dim() {
        return Err(FractureError::ExplanationUnavailable(format!(
            "activation shape {:?} does not match gradient shape {:?}",
            ag.activations.dim(),
            ag.gradients.dim()
        )));
    }
    let pooled = ag
        .gradients
        .mean_axis(Axis(0))
        .and_then(|g| g.mean_axis(Axis(0)))
        .ok_or_else(|| FractureError::ExplanationUnavailable("empty gradient tensor".into()))?;

    let heat = ag
        .activations
        .map_axis(Axis(2), |channels| channels.dot(&pooled).max(0.0));
    let max = heat.iter().cloned().fold(0.0f32, f32::max);
    if !(max > 0.0 && max.is_finite()) {
        return Err(FractureError::ExplanationUnavailable(
            "degenerate activation gradient".into(),
        ));
    }
    Ok(heat.mapv(|v| v / max))
}

/// JET palette: blue for 0, through green, to red for 1.
pub fn jet(v: f32) -> Rgb<u8> {
    let v = v.clamp(0.0, 1.0);
    let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

#[derive(Debug, Clone)]
pub struct ExplanationEngine {
    pub layer: String,
    pub alpha: f32,
}

impl ExplanationEngine {
    pub fn new(layer: impl Into<String>, alpha: f32) -> Self {
        Self {
            layer: layer.into(),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Normalised `[0, 1]` heatmap for `class_index`, or `None` when the
    /// model lacks the layer or the activation is degenerate.
    pub fn heatmap(
        &self,
        input: &ImageTensor,
        model: &dyn Classifier,
        class_index: usize,
    ) -> Option<Array2<f32>> {
        let result = model
            .activation_gradients(input, &self.layer, class_index)
            .and_then(|ag| {
                ag.ok_or_else(|| {
                    FractureError::ExplanationUnavailable(format!("layer {} not found", self.layer))
                })
            })
            .and_then(|ag| grad_cam(&ag));
        match result {
            Ok(heatmap) => Some(heatmap),
            Err(e) => {
                warn!(error = %e, "no Grad-CAM for this request");
                None
            }
        }
    }

    /// Stretches the heatmap to the source resolution and blends it on top.
    pub fn composite(&self, source: &DynamicImage, heatmap: &Array2<f32>) -> Result<RgbImage> {
        let (rows, cols) = heatmap.dim();
        let small: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(cols as u32, rows as u32, heatmap.iter().copied().collect())
                .ok_or_else(|| FractureError::ExplanationUnavailable("empty heatmap".into()))?;

        let mut base = source.to_rgb8();
        let (width, height) = base.dimensions();
        let scaled = image::imageops::resize(&small, width, height, FilterType::Triangle);

        let alpha = self.alpha;
        base.par_chunks_mut(3)
            .zip(scaled.as_raw().par_iter())
            .for_each(|(pixel, &v)| {
                let Rgb(color) = jet(v);
                for (dst, src) in pixel.iter_mut().zip(color) {
                    *dst = ((1.0 - alpha) * *dst as f32 + alpha * src as f32).round().clamp(0.0, 255.0) as u8;
                }
            });
        Ok(base)
    }

    /// Writes the composite to `output_path`. `None` on any failure.
    pub fn overlay(
        &self,
        source: &DynamicImage,
        heatmap: &Array2<f32>,
        output_path: &Path,
    ) -> Option<PathBuf> {
        let written = self
            .composite(source, heatmap)
            .and_then(|img| {
                img.save(output_path)
                    .map_err(|e| FractureError::ExplanationUnavailable(e.to_string()))
            });
        match written {
            Ok(()) => {
                debug!(path = %output_path.display(), "Grad-CAM overlay written");
                Some(output_path.to_path_buf())
            }
            Err(e) => {
                warn!(path = %output_path.display(), error = %e, "overlay not written");
                None
            }
        }
    }

    /// Same as [`overlay`](Self::overlay) but decodes the source from disk.
    pub fn overlay_file(
        &self,
        source_path: &Path,
        heatmap: &Array2<f32>,
        output_path: &Path,
    ) -> Option<PathBuf> {
        match image::open(source_path) {
            Ok(source) => self.overlay(&source, heatmap, output_path),
            Err(e) => {
                warn!(path = %source_path.display(), error = %e, "overlay source unreadable");
                None
            }
        }
    }
}

/// `cam_<int(adjusted*100)>_<display_name>`
pub fn overlay_file_name(adjusted_probability: f32, display_name: &str) -> String {
    // percentage taken in f64, so 0.29 names cam_28
    format!("cam_{}_{}", (adjusted_probability as f64 * 100.0) as i32, display_name)
}
