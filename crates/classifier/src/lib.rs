//! Chest X-ray Classifier
//!
//! Wraps a pretrained convolutional network (candle) behind the `Model`
//! trait:
//! - layer introspection, so explainers can locate the last convolution
//! - class probability distribution for one input
//! - per-layer activations and gradients of the predicted class score

pub mod architecture;
pub mod labels;
mod layers;
mod network;

pub use architecture::{Activation, Architecture, LayerKind, LayerSpec, Padding};
pub use candle_core;
pub use labels::{label_for, Diagnosis, LABELS, UNKNOWN_LABEL};
pub use network::Network;

use ndarray::Array3;
use radiograph::ModelInput;
use thiserror::Error;

/// Errors raised by a classifier
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Layer {0} is not a convolutional layer of this network")]
    InvalidLayer(usize),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
}

impl From<candle_core::Error> for ModelError {
    fn from(e: candle_core::Error) -> Self {
        ModelError::Inference(e.to_string())
    }
}

/// Class probability distribution for one input
#[derive(Debug, Clone, PartialEq)]
pub struct Probabilities(Vec<f32>);

impl Probabilities {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// Index of the largest probability; ties resolve to the lowest index.
    /// NaN entries are ignored.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &p) in self.0.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            match best {
                Some((_, b)) if p <= b => {}
                _ => best = Some((i, p)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Largest probability
    pub fn max(&self) -> Option<f32> {
        self.argmax().map(|i| self.0[i])
    }
}

/// Activations of one convolutional layer and the gradient of a class score
/// with respect to them, both (H', W', C)
#[derive(Debug, Clone)]
pub struct LayerGradients {
    /// Class whose score was differentiated
    pub class_index: usize,
    /// Distribution from the same forward pass
    pub probabilities: Probabilities,
    pub activations: Array3<f32>,
    pub gradients: Array3<f32>,
}

/// A classifier that supports gradient-based explanation
pub trait Model: Send + Sync {
    /// Layer type tags in evaluation order
    fn layer_kinds(&self) -> &[LayerKind];

    /// Class probabilities for one input
    fn classify(&self, input: &ModelInput) -> Result<Probabilities, ModelError>;

    /// Forward pass recording layer `layer`, then gradients of the top-scoring
    /// class with respect to that layer's output
    fn layer_gradients(&self, input: &ModelInput, layer: usize) -> Result<LayerGradients, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_largest() {
        let p = Probabilities::new(vec![0.2, 0.3, 0.5]);
        assert_eq!(p.argmax(), Some(2));
        assert_eq!(p.max(), Some(0.5));
    }

    #[test]
    fn test_argmax_tie_takes_first() {
        let p = Probabilities::new(vec![0.4, 0.4, 0.2]);
        assert_eq!(p.argmax(), Some(0));
    }

    #[test]
    fn test_argmax_skips_nan() {
        let p = Probabilities::new(vec![f32::NAN, 0.1, 0.05]);
        assert_eq!(p.argmax(), Some(1));

        let all_nan = Probabilities::new(vec![f32::NAN; 3]);
        assert_eq!(all_nan.argmax(), None);
        assert_eq!(all_nan.max(), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_argmax_holds_the_maximum(values in proptest::collection::vec(0.0f32..=1.0, 1..8)) {
            let p = Probabilities::new(values.clone());
            let index = p.argmax().unwrap();
            proptest::prop_assert!(values.iter().all(|&v| v <= values[index]));
            proptest::prop_assert!(values[..index].iter().all(|&v| v < values[index]));
            proptest::prop_assert_eq!(p.max(), Some(values[index]));
        }
    }

    #[test]
    fn test_empty_distribution() {
        let p = Probabilities::new(Vec::new());
        assert!(p.is_empty());
        assert_eq!(p.argmax(), None);
        assert_eq!(p.get(0), None);
    }
}
