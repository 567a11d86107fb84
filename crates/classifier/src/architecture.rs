//! Network architecture descriptors
//!
//! A network is an ordered list of layer descriptors, serialized as JSON next
//! to the weight file:
//!
//! ```json
//! {
//!   "input_shape": [512, 512, 1],
//!   "layers": [
//!     { "type": "conv2d", "name": "conv1", "filters": 16, "kernel_size": 3,
//!       "padding": "same", "activation": "relu" },
//!     { "type": "max_pool2d", "pool_size": 2 },
//!     { "type": "global_average_pool2d" },
//!     { "type": "dense", "name": "head", "units": 3, "activation": "softmax" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Element-wise activation applied after a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// Spatial padding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// No padding; output shrinks by `kernel - 1`
    #[default]
    Valid,
    /// Zero padding so that `output = ceil(input / stride)`
    Same,
}

fn one() -> usize {
    1
}

fn enabled() -> bool {
    true
}

fn batch_norm_epsilon() -> f64 {
    1e-3
}

/// One layer of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        name: String,
        filters: usize,
        kernel_size: usize,
        #[serde(default = "one")]
        strides: usize,
        #[serde(default)]
        padding: Padding,
        #[serde(default)]
        activation: Activation,
        #[serde(default = "enabled")]
        use_bias: bool,
    },
    DepthwiseConv2d {
        name: String,
        kernel_size: usize,
        #[serde(default = "one")]
        strides: usize,
        #[serde(default)]
        padding: Padding,
        #[serde(default = "one")]
        depth_multiplier: usize,
        #[serde(default)]
        activation: Activation,
        #[serde(default = "enabled")]
        use_bias: bool,
    },
    SeparableConv2d {
        name: String,
        filters: usize,
        kernel_size: usize,
        #[serde(default = "one")]
        strides: usize,
        #[serde(default)]
        padding: Padding,
        #[serde(default = "one")]
        depth_multiplier: usize,
        #[serde(default)]
        activation: Activation,
        #[serde(default = "enabled")]
        use_bias: bool,
    },
    /// Max pooling; stride equals the pool size
    MaxPool2d { pool_size: usize },
    /// Average pooling; stride equals the pool size
    AveragePool2d { pool_size: usize },
    /// Batch normalization with frozen statistics
    BatchNorm {
        name: String,
        #[serde(default = "batch_norm_epsilon")]
        epsilon: f64,
    },
    Activation { activation: Activation },
    /// Identity at inference
    Dropout {
        #[serde(default)]
        rate: f32,
    },
    Flatten,
    GlobalAveragePool2d,
    Dense {
        name: String,
        units: usize,
        #[serde(default)]
        activation: Activation,
        #[serde(default = "enabled")]
        use_bias: bool,
    },
}

/// Layer type tag used for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Conv2d,
    DepthwiseConv2d,
    SeparableConv2d,
    MaxPool2d,
    AveragePool2d,
    BatchNorm,
    Activation,
    Dropout,
    Flatten,
    GlobalAveragePool2d,
    Dense,
}

impl LayerKind {
    /// Whether this is one of the convolution variants
    pub fn is_convolutional(&self) -> bool {
        matches!(
            self,
            LayerKind::Conv2d | LayerKind::DepthwiseConv2d | LayerKind::SeparableConv2d
        )
    }
}

impl LayerSpec {
    /// Get the type tag
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerSpec::Conv2d { .. } => LayerKind::Conv2d,
            LayerSpec::DepthwiseConv2d { .. } => LayerKind::DepthwiseConv2d,
            LayerSpec::SeparableConv2d { .. } => LayerKind::SeparableConv2d,
            LayerSpec::MaxPool2d { .. } => LayerKind::MaxPool2d,
            LayerSpec::AveragePool2d { .. } => LayerKind::AveragePool2d,
            LayerSpec::BatchNorm { .. } => LayerKind::BatchNorm,
            LayerSpec::Activation { .. } => LayerKind::Activation,
            LayerSpec::Dropout { .. } => LayerKind::Dropout,
            LayerSpec::Flatten => LayerKind::Flatten,
            LayerSpec::GlobalAveragePool2d => LayerKind::GlobalAveragePool2d,
            LayerSpec::Dense { .. } => LayerKind::Dense,
        }
    }

    /// Weight prefix of a parameterized layer
    pub fn name(&self) -> Option<&str> {
        match self {
            LayerSpec::Conv2d { name, .. }
            | LayerSpec::DepthwiseConv2d { name, .. }
            | LayerSpec::SeparableConv2d { name, .. }
            | LayerSpec::BatchNorm { name, .. }
            | LayerSpec::Dense { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Full network description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    /// Input (height, width, channels)
    pub input_shape: [usize; 3],
    /// Layers in evaluation order
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    /// Read an architecture from a JSON file
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModelError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse an architecture from JSON text
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        serde_json::from_str(text)
            .map_err(|e| ModelError::ModelLoad(format!("invalid architecture: {}", e)))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ModelError> {
        serde_json::to_string_pretty(self).map_err(|e| ModelError::ModelLoad(e.to_string()))
    }

    /// Layer type tags in evaluation order
    pub fn kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(LayerSpec::kind).collect()
    }
}
