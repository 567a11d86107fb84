//! Class activation maps from layer activations and gradients

use classifier::LayerKind;
use ndarray::{s, Array1, Array2, Array3, Axis};

use crate::ExplainError;

/// Lower bound of the normalization denominator
pub const EPSILON: f32 = 1e-8;

/// Spatial relevance map with values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    /// Get the (height, width) of the map
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn into_values(self) -> Array2<f32> {
        self.values
    }
}

/// Index of the last convolution-family layer, scanning from the output
pub fn last_conv_layer(kinds: &[LayerKind]) -> Option<usize> {
    kinds.iter().rposition(LayerKind::is_convolutional)
}

/// Grad-CAM relevance of (H', W', C) activations and their gradients
///
/// Channel weights are the spatial mean of each gradient channel; the
/// weighted channel sum is rectified and min-max normalized.
pub fn relevance_map(
    activations: &Array3<f32>,
    gradients: &Array3<f32>,
) -> Result<SaliencyMap, ExplainError> {
    if activations.dim() != gradients.dim() {
        return Err(ExplainError::ShapeMismatch {
            activations: activations.shape().to_vec(),
            gradients: gradients.shape().to_vec(),
        });
    }
    let (height, width, channels) = activations.dim();
    if height == 0 || width == 0 || channels == 0 {
        return Err(ExplainError::ShapeMismatch {
            activations: activations.shape().to_vec(),
            gradients: gradients.shape().to_vec(),
        });
    }

    let weights = gradients
        .mean_axis(Axis(0))
        .and_then(|rows| rows.mean_axis(Axis(0)))
        .unwrap_or_else(|| Array1::zeros(channels));

    let mut values = Array2::from_shape_fn((height, width), |(y, x)| {
        activations.slice(s![y, x, ..]).dot(&weights)
    });
    values.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.max(0.0) });
    normalise_unit_interval(&mut values);

    Ok(SaliencyMap { values })
}

/// Rescale to [0, 1]; a flat map becomes all zeros
fn normalise_unit_interval(values: &mut Array2<f32>) {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        values.fill(0.0);
        return;
    }
    let range = (max - min).max(EPSILON);
    values.mapv_inplace(|v| ((v - min) / range).clamp(0.0, 1.0));
}
