//! Grad-CAM Explainer
//!
//! Produces a class-discriminative heatmap for the predicted class:
//! 1. Locate the last convolutional layer
//! 2. Gradients of the predicted class score w.r.t. that layer's output
//! 3. Channel weights from spatially averaged gradients
//! 4. Rectified, normalized weighted channel sum
//! 5. Jet-coloured heatmap blended onto the radiograph

pub mod render;
pub mod saliency;

pub use render::{composite, heatmap, jet, Overlay, BASE_WEIGHT, HEAT_WEIGHT};
pub use saliency::{last_conv_layer, relevance_map, SaliencyMap, EPSILON};

use std::time::Instant;

use classifier::{Model, ModelError};
use radiograph::{ModelInput, Sample, MODEL_INPUT_SIZE};
use thiserror::Error;
use tracing::debug;

/// Explainer error types
#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Network has no convolutional layer to explain")]
    NoConvLayer,

    #[error("Activation shape {activations:?} does not match gradient shape {gradients:?}")]
    ShapeMismatch {
        activations: Vec<usize>,
        gradients: Vec<usize>,
    },

    #[error("Cannot render sample of shape {shape:?}")]
    InvalidSample { shape: Vec<usize> },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Explain the network's prediction for `input` as an overlay on `sample`
///
/// `input` must be the preprocessed form of `sample`. The overlay is
/// always `MODEL_INPUT_SIZE` square, whatever the sample resolution.
pub fn explain(sample: &Sample, input: &ModelInput, model: &dyn Model) -> Result<Overlay, ExplainError> {
    let start = Instant::now();
    let layer = last_conv_layer(model.layer_kinds()).ok_or(ExplainError::NoConvLayer)?;

    let layer_gradients = model.layer_gradients(input, layer)?;
    let map = relevance_map(&layer_gradients.activations, &layer_gradients.gradients)?;
    debug!(
        "Relevance map {:?} from layer {} for class {}",
        map.dim(),
        layer,
        layer_gradients.class_index
    );

    let heat = heatmap(&map, MODEL_INPUT_SIZE);
    let overlay = composite(sample, &heat)?;
    debug!("Explanation rendered in {:?}", start.elapsed());
    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use classifier::{LayerGradients, LayerKind, Probabilities};
    use ndarray::{Array2, Array3, Array4, ArrayD, IxDyn};
    use proptest::prelude::*;

    /// Returns canned activations and gradients
    struct StubModel {
        kinds: Vec<LayerKind>,
        activations: Array3<f32>,
        gradients: Array3<f32>,
    }

    impl StubModel {
        fn with_maps(activations: Array3<f32>, gradients: Array3<f32>) -> Self {
            Self {
                kinds: vec![
                    LayerKind::Conv2d,
                    LayerKind::MaxPool2d,
                    LayerKind::Conv2d,
                    LayerKind::GlobalAveragePool2d,
                    LayerKind::Dense,
                ],
                activations,
                gradients,
            }
        }

        fn hot_corner() -> Self {
            let activations = Array3::from_shape_fn((4, 4, 2), |(y, x, c)| {
                if c == 0 && y == 0 && x == 0 {
                    1.0
                } else {
                    0.0
                }
            });
            Self::with_maps(activations, Array3::from_elem((4, 4, 2), 0.5))
        }
    }

    impl Model for StubModel {
        fn layer_kinds(&self) -> &[LayerKind] {
            &self.kinds
        }

        fn classify(&self, _input: &ModelInput) -> Result<Probabilities, ModelError> {
            Ok(Probabilities::new(vec![0.2, 0.3, 0.5]))
        }

        fn layer_gradients(&self, input: &ModelInput, layer: usize) -> Result<LayerGradients, ModelError> {
            assert_eq!(layer, 2, "explainer must target the last convolution");
            let probabilities = self.classify(input)?;
            Ok(LayerGradients {
                class_index: probabilities.argmax().unwrap_or(0),
                probabilities,
                activations: self.activations.clone(),
                gradients: self.gradients.clone(),
            })
        }
    }

    fn blank_input() -> ModelInput {
        ModelInput::from_array(Array4::zeros((1, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 1))).unwrap()
    }

    #[test]
    fn test_overlay_shape_for_any_resolution() {
        let model = StubModel::hot_corner();
        for sample in [
            Sample::filled_rgb(512, 512, 128),
            Sample::filled_rgb(37, 901, 10),
            Sample::gray(Array2::from_elem((1024, 768), 200)),
        ] {
            let overlay = explain(&sample, &blank_input(), &model).unwrap();
            assert_eq!(overlay.shape(), (MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 3));
        }
    }

    #[test]
    fn test_hot_region_is_warmer() {
        let model = StubModel::hot_corner();
        let overlay = explain(&Sample::filled_rgb(512, 512, 0), &blank_input(), &model).unwrap();
        let hot = overlay.image().get_pixel(0, 0);
        let cold = overlay.image().get_pixel(511, 511);
        assert!(hot[0] > cold[0]);
        assert!(cold[2] > cold[0]);
    }

    #[test]
    fn test_no_conv_layer() {
        let mut model = StubModel::hot_corner();
        model.kinds = vec![LayerKind::Flatten, LayerKind::Dense];
        assert!(matches!(
            explain(&Sample::filled_rgb(8, 8, 0), &blank_input(), &model),
            Err(ExplainError::NoConvLayer)
        ));
    }

    #[test]
    fn test_flat_relevance_renders_uniform_overlay() {
        let model = StubModel::with_maps(Array3::zeros((4, 4, 2)), Array3::zeros((4, 4, 2)));
        let overlay = explain(&Sample::filled_rgb(512, 512, 128), &blank_input(), &model).unwrap();
        let first = *overlay.image().get_pixel(0, 0);
        assert!(overlay.image().pixels().all(|p| *p == first));
        // 0.6 * 128 + 0.4 * jet(0)
        assert_eq!(first, image::Rgb([77, 77, 128]));
    }

    #[test]
    fn test_invalid_sample_rejected() {
        let model = StubModel::hot_corner();
        let sample = Sample::from_array(ArrayD::zeros(IxDyn(&[4, 4, 2])));
        assert!(matches!(
            explain(&sample, &blank_input(), &model),
            Err(ExplainError::InvalidSample { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_overlay_is_model_sized(height in 1usize..64, width in 1usize..64, gray in any::<bool>()) {
            let sample = if gray {
                Sample::gray(Array2::from_elem((height, width), 90))
            } else {
                Sample::filled_rgb(height, width, 90)
            };
            let overlay = explain(&sample, &blank_input(), &StubModel::hot_corner()).unwrap();
            prop_assert_eq!(overlay.shape(), (MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 3));
        }
    }
}
