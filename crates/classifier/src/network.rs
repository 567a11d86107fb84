//! Pretrained network loaded from disk

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarBuilder;
use ndarray::Array3;
use radiograph::ModelInput;
use tracing::{debug, info};

use crate::architecture::{Architecture, LayerKind};
use crate::layers::{self, Layer};
use crate::{LayerGradients, Model, ModelError, Probabilities};

/// Convolutional classifier evaluated on the CPU
pub struct Network {
    architecture: Architecture,
    kinds: Vec<LayerKind>,
    layers: Vec<Layer>,
    device: Device,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("input_shape", &self.architecture.input_shape)
            .field("layers", &self.kinds)
            .finish()
    }
}

impl Network {
    /// Load a network from `<stem>.safetensors` weights and a `<stem>.json`
    /// architecture next to it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let (weights_path, architecture_path) = model_files(path);
        info!("Loading network from {:?}", weights_path);

        if !weights_path.is_file() {
            return Err(ModelError::ModelLoad(format!(
                "weights not found: {}",
                weights_path.display()
            )));
        }
        let architecture = Architecture::from_path(&architecture_path)?;

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(&weights_path, &device).map_err(|e| {
            ModelError::ModelLoad(format!("{}: {}", weights_path.display(), e))
        })?;

        let network = Self::from_tensors(architecture, tensors)?;
        info!(
            "Network loaded: {} layers, input {:?}",
            network.kinds.len(),
            network.architecture.input_shape
        );
        Ok(network)
    }

    /// Build a network from an architecture and named weight tensors
    pub fn from_tensors(
        architecture: Architecture,
        tensors: HashMap<String, Tensor>,
    ) -> Result<Self, ModelError> {
        let device = Device::Cpu;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let layers = layers::build(&architecture, &vb)?;
        let kinds = layers.iter().map(Layer::kind).collect();

        Ok(Self {
            architecture,
            kinds,
            layers,
            device,
        })
    }

    /// Get the architecture
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    fn input_tensor(&self, input: &ModelInput) -> Result<Tensor, ModelError> {
        let [height, width, channels] = self.architecture.input_shape;
        let (batch, h, w, c) = input.shape();
        if (batch, h, w, c) != (1, height, width, channels) {
            return Err(ModelError::InvalidInputShape {
                expected: format!("(1, {}, {}, {})", height, width, channels),
                actual: format!("({}, {}, {}, {})", batch, h, w, c),
            });
        }

        // NHWC → NCHW
        let tensor = Tensor::from_slice(input.as_slice(), (1, h, w, c), &self.device)?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        Ok(tensor)
    }

    fn run(&self, layers: &[Layer], input: Tensor) -> Result<Tensor, ModelError> {
        let mut x = input;
        for layer in layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }
}

impl Model for Network {
    fn layer_kinds(&self) -> &[LayerKind] {
        &self.kinds
    }

    fn classify(&self, input: &ModelInput) -> Result<Probabilities, ModelError> {
        let start = Instant::now();
        let output = self.run(&self.layers, self.input_tensor(input)?)?;
        let probabilities = output.flatten_all()?.to_vec1::<f32>()?;
        debug!("Forward pass in {:?}: {:?}", start.elapsed(), probabilities);
        Ok(Probabilities::new(probabilities))
    }

    fn layer_gradients(&self, input: &ModelInput, layer: usize) -> Result<LayerGradients, ModelError> {
        if !self.kinds.get(layer).is_some_and(LayerKind::is_convolutional) {
            return Err(ModelError::InvalidLayer(layer));
        }
        let start = Instant::now();

        // Split at the layer and re-root its output so the tail is tracked
        let (head, tail) = self.layers.split_at(layer + 1);
        let activation = self.run(head, self.input_tensor(input)?)?;
        let activation = Var::from_tensor(&activation)?;
        let output = self.run(tail, activation.as_tensor().clone())?.flatten_all()?;

        let probabilities = Probabilities::new(output.to_vec1::<f32>()?);
        let class_index = probabilities
            .argmax()
            .ok_or_else(|| ModelError::Inference("network produced no finite class score".to_string()))?;

        let grads = output.get(class_index)?.backward()?;
        let gradient = match grads.get(activation.as_tensor()) {
            Some(g) => g.clone(),
            None => activation.as_tensor().zeros_like()?,
        };

        let activations = to_hwc(activation.as_tensor())?;
        let gradients = to_hwc(&gradient)?;
        debug!(
            "Gradients of class {} at layer {} in {:?}: {:?}",
            class_index,
            layer,
            start.elapsed(),
            activations.dim()
        );

        Ok(LayerGradients {
            class_index,
            probabilities,
            activations,
            gradients,
        })
    }
}

/// Weight and architecture paths for a model path with any extension
fn model_files(path: &Path) -> (PathBuf, PathBuf) {
    (path.with_extension("safetensors"), path.with_extension("json"))
}

/// (1, C, H, W) tensor → (H, W, C) array
fn to_hwc(tensor: &Tensor) -> Result<Array3<f32>, ModelError> {
    let (_, c, h, w) = tensor.dims4()?;
    let values = tensor
        .squeeze(0)?
        .permute((1, 2, 0))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Array3::from_shape_vec((h, w, c), values).map_err(|e| ModelError::Inference(e.to_string()))
}
