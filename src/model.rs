use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array3, ArrayD, Axis, CowArray, Ix4};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use tracing::debug;

use crate::error::{FractureError, Result};
use crate::postprocess::to_probabilities;
use crate::preprocess::{ImageTensor, TensorLayout};
use crate::registry::ModelRole;

/// Last convolutional activations and the gradient of one class score with
/// respect to them, both laid out `[height, width, channels]`.
#[derive(Debug, Clone)]
pub struct ActivationGradients {
    pub activations: Array3<f32>,
    pub gradients: Array3<f32>,
}

/// A loaded classifier: "given a preprocessed image tensor, return class probabilities".
pub trait Classifier: Send + Sync {
    fn infer(&self, input: &ImageTensor) -> Result<Array1<f32>>;

    /// `Ok(None)` when the model does not expose `layer`.
    fn activation_gradients(
        &self,
        _input: &ImageTensor,
        _layer: &str,
        _class_index: usize,
    ) -> Result<Option<ActivationGradients>> {
        Ok(None)
    }
}

pub type ModelHandle = Arc<dyn Classifier>;

/// Turns a weights artifact into a [`ModelHandle`].
pub trait ModelLoader: Send + Sync {
    fn load(&self, role: ModelRole, path: &Path) -> Result<ModelHandle>;
}

/// ONNX Runtime backed loader.
pub struct OnnxModel {
    provider: [ExecutionProviderDispatch; 1],
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        let provider = if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        };
        Self { provider }
    }

    pub fn load_model(&self, model_path: &Path) -> Result<Session> {
        let session = SessionBuilder::new()?
            .with_execution_providers(self.provider.clone())?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;
        Ok(session)
    }
}

impl ModelLoader for OnnxModel {
    fn load(&self, role: ModelRole, path: &Path) -> Result<ModelHandle> {
        let session = self.load_model(path).map_err(|e| FractureError::ModelLoad {
            role,
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(
            %role,
            inputs = session.inputs.len(),
            outputs = session.outputs.len(),
            "ONNX session ready"
        );
        Ok(Arc::new(OnnxClassifier { role, session }))
    }
}

/// Classifier over an ONNX session. Grad-CAM needs the exported graph to
/// carry two extra outputs: `<layer>` and `<layer>_grad_<class>`.
pub struct OnnxClassifier {
    role: ModelRole,
    session: Session,
}

impl OnnxClassifier {
    fn has_output(&self, name: &str) -> bool {
        self.session.outputs.iter().any(|o| o.name == name)
    }

    fn run(&self, input: &ImageTensor, wanted: &[&str]) -> Result<Vec<ArrayD<f32>>> {
        let xs = CowArray::from(input.view().into_dyn());
        let input_data = ort::inputs![xs.view()]?;
        let t = std::time::Instant::now();
        let ys = self.session.run(input_data)?;
        debug!(role = %self.role, elapsed = ?t.elapsed(), "model");

        wanted
            .iter()
            .map(|name| {
                let value = ys.get(*name).ok_or_else(|| {
                    FractureError::Inference(format!("model output {name} missing"))
                })?;
                Ok(value.try_extract_tensor::<f32>()?.into_owned())
            })
            .collect()
    }

    fn to_hwc(&self, array: ArrayD<f32>, layout: TensorLayout) -> Result<Array3<f32>> {
        let batch = array.into_dimensionality::<Ix4>()?;
        let first = batch.index_axis_move(Axis(0), 0);
        Ok(match layout {
            TensorLayout::Nhwc => first,
            TensorLayout::Nchw => first.permuted_axes([1, 2, 0]),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, input: &ImageTensor) -> Result<Array1<f32>> {
        let output = self
            .session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| FractureError::Inference("model has no outputs".into()))?;
        let mut ys = self.run(input, &[output.as_str()])?;
        let probs = ys
            .pop()
            .ok_or_else(|| FractureError::Inference("model returned nothing".into()))?;
        to_probabilities(&probs)
    }

    fn activation_gradients(
        &self,
        input: &ImageTensor,
        layer: &str,
        class_index: usize,
    ) -> Result<Option<ActivationGradients>> {
        let grad_name = format!("{layer}_grad_{class_index}");
        if !self.has_output(layer) || !self.has_output(&grad_name) {
            return Ok(None);
        }
        let mut ys = self.run(input, &[layer, grad_name.as_str()])?;
        let (Some(gradients), Some(activations)) = (ys.pop(), ys.pop()) else {
            return Ok(None);
        };
        Ok(Some(ActivationGradients {
            activations: self.to_hwc(activations, input.layout())?,
            gradients: self.to_hwc(gradients, input.layout())?,
        }))
    }
}
