//! Layer construction and evaluation
//!
//! Weights use NCHW tensors and these names:
//! - convolution: `{name}.weight` (filters, in/groups, k, k), `{name}.bias`
//! - separable: `{name}.depthwise.weight`, `{name}.pointwise.weight`, `{name}.bias`
//! - batch norm: `{name}.gamma`, `.beta`, `.running_mean`, `.running_var`
//! - dense: `{name}.weight` (units, in_features), `{name}.bias`
//!
//! `Flatten` emits features in (H, W, C) order, so a dense kernel exported
//! from a channels-last model only needs transposing.

use candle_core::{Result as CandleResult, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder};

use crate::architecture::{Activation, Architecture, LayerKind, LayerSpec, Padding};
use crate::ModelError;

/// Feature shape flowing between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeatureShape {
    Spatial { channels: usize, height: usize, width: usize },
    Flat(usize),
}

/// Zero padding (top, bottom, left, right)
type Pad = (usize, usize, usize, usize);

enum Op {
    Conv {
        conv: Conv2d,
        pad: Pad,
        activation: Activation,
    },
    Separable {
        depthwise: Conv2d,
        pointwise: Conv2d,
        pad: Pad,
        activation: Activation,
    },
    MaxPool(usize),
    AveragePool(usize),
    /// Frozen batch norm folded into `x * scale + shift`
    Affine { scale: Tensor, shift: Tensor },
    Activation(Activation),
    Identity,
    Flatten,
    GlobalAveragePool,
    Dense { linear: Linear, activation: Activation },
}

/// One built layer
pub(crate) struct Layer {
    kind: LayerKind,
    op: Op,
}

impl Layer {
    pub(crate) fn kind(&self) -> LayerKind {
        self.kind
    }

    pub(crate) fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        match &self.op {
            Op::Conv {
                conv,
                pad,
                activation,
            } => apply_activation(&conv.forward(&pad_spatial(x, *pad)?)?, *activation),
            Op::Separable {
                depthwise,
                pointwise,
                pad,
                activation,
            } => {
                let spread = depthwise.forward(&pad_spatial(x, *pad)?)?;
                apply_activation(&pointwise.forward(&spread)?, *activation)
            }
            Op::MaxPool(size) => x.max_pool2d(*size),
            Op::AveragePool(size) => x.avg_pool2d(*size),
            Op::Affine { scale, shift } => {
                let channels = scale.dim(0)?;
                let (scale, shift) = if x.rank() == 4 {
                    (scale.reshape((1, channels, 1, 1))?, shift.reshape((1, channels, 1, 1))?)
                } else {
                    (scale.reshape((1, channels))?, shift.reshape((1, channels))?)
                };
                x.broadcast_mul(&scale)?.broadcast_add(&shift)
            }
            Op::Activation(activation) => apply_activation(x, *activation),
            Op::Identity => Ok(x.clone()),
            Op::Flatten if x.rank() == 4 => x.permute((0, 2, 3, 1))?.contiguous()?.flatten_from(1),
            Op::Flatten => x.flatten_from(1),
            Op::GlobalAveragePool => x.mean((2, 3)),
            Op::Dense { linear, activation } => apply_activation(&linear.forward(x)?, *activation),
        }
    }
}

/// Build all layers, checking weight shapes against the inferred feature shapes
pub(crate) fn build(architecture: &Architecture, vb: &VarBuilder) -> Result<Vec<Layer>, ModelError> {
    let [height, width, channels] = architecture.input_shape;
    if height == 0 || width == 0 || channels == 0 {
        return Err(ModelError::ModelLoad(format!(
            "invalid input shape {:?}",
            architecture.input_shape
        )));
    }

    let mut shape = FeatureShape::Spatial {
        channels,
        height,
        width,
    };
    let mut layers = Vec::with_capacity(architecture.layers.len());

    for (index, spec) in architecture.layers.iter().enumerate() {
        let (op, next) = build_op(spec, shape, vb)
            .map_err(|e| ModelError::ModelLoad(format!("layer {} ({:?}): {}", index, spec.kind(), e)))?;
        layers.push(Layer {
            kind: spec.kind(),
            op,
        });
        shape = next;
    }

    if !matches!(shape, FeatureShape::Flat(_)) {
        return Err(ModelError::ModelLoad(
            "network must end with a flat class-score layer".to_string(),
        ));
    }
    Ok(layers)
}

fn build_op(spec: &LayerSpec, shape: FeatureShape, vb: &VarBuilder) -> Result<(Op, FeatureShape), String> {
    match spec {
        LayerSpec::Conv2d {
            name,
            filters,
            kernel_size,
            strides,
            padding,
            activation,
            use_bias,
        } => {
            let (c, h, w) = spatial(shape)?;
            let (pad, oh, ow) = conv_geometry(h, w, *kernel_size, *strides, *padding)?;
            let vb = vb.pp(name.as_str());
            let weight = vb
                .get((*filters, c, *kernel_size, *kernel_size), "weight")
                .map_err(|e| e.to_string())?;
            let bias = optional_bias(&vb, *use_bias, *filters)?;
            let conv = Conv2d::new(weight, bias, conv_config(*strides, 1));
            Ok((
                Op::Conv {
                    conv,
                    pad,
                    activation: *activation,
                },
                FeatureShape::Spatial {
                    channels: *filters,
                    height: oh,
                    width: ow,
                },
            ))
        }
        LayerSpec::DepthwiseConv2d {
            name,
            kernel_size,
            strides,
            padding,
            depth_multiplier,
            activation,
            use_bias,
        } => {
            let (c, h, w) = spatial(shape)?;
            let (pad, oh, ow) = conv_geometry(h, w, *kernel_size, *strides, *padding)?;
            let out = c * (*depth_multiplier).max(1);
            let vb = vb.pp(name.as_str());
            let weight = vb
                .get((out, 1, *kernel_size, *kernel_size), "weight")
                .map_err(|e| e.to_string())?;
            let bias = optional_bias(&vb, *use_bias, out)?;
            let conv = Conv2d::new(weight, bias, conv_config(*strides, c));
            Ok((
                Op::Conv {
                    conv,
                    pad,
                    activation: *activation,
                },
                FeatureShape::Spatial {
                    channels: out,
                    height: oh,
                    width: ow,
                },
            ))
        }
        LayerSpec::SeparableConv2d {
            name,
            filters,
            kernel_size,
            strides,
            padding,
            depth_multiplier,
            activation,
            use_bias,
        } => {
            let (c, h, w) = spatial(shape)?;
            let (pad, oh, ow) = conv_geometry(h, w, *kernel_size, *strides, *padding)?;
            let spread = c * (*depth_multiplier).max(1);
            let vb = vb.pp(name.as_str());
            let depthwise_weight = vb
                .get((spread, 1, *kernel_size, *kernel_size), "depthwise.weight")
                .map_err(|e| e.to_string())?;
            let pointwise_weight = vb
                .get((*filters, spread, 1, 1), "pointwise.weight")
                .map_err(|e| e.to_string())?;
            let bias = optional_bias(&vb, *use_bias, *filters)?;
            Ok((
                Op::Separable {
                    depthwise: Conv2d::new(depthwise_weight, None, conv_config(*strides, c)),
                    pointwise: Conv2d::new(pointwise_weight, bias, conv_config(1, 1)),
                    pad,
                    activation: *activation,
                },
                FeatureShape::Spatial {
                    channels: *filters,
                    height: oh,
                    width: ow,
                },
            ))
        }
        LayerSpec::MaxPool2d { pool_size } | LayerSpec::AveragePool2d { pool_size } => {
            let (c, h, w) = spatial(shape)?;
            let size = *pool_size;
            if size == 0 || size > h || size > w {
                return Err(format!("pool size {} does not fit {}x{}", size, h, w));
            }
            let op = if matches!(spec, LayerSpec::MaxPool2d { .. }) {
                Op::MaxPool(size)
            } else {
                Op::AveragePool(size)
            };
            Ok((
                op,
                FeatureShape::Spatial {
                    channels: c,
                    height: h / size,
                    width: w / size,
                },
            ))
        }
        LayerSpec::BatchNorm { name, epsilon } => {
            let channels = match shape {
                FeatureShape::Spatial { channels, .. } => channels,
                FeatureShape::Flat(n) => n,
            };
            let vb = vb.pp(name.as_str());
            let (scale, shift) = fold_batch_norm(&vb, channels, *epsilon).map_err(|e| e.to_string())?;
            Ok((Op::Affine { scale, shift }, shape))
        }
        LayerSpec::Activation { activation } => Ok((Op::Activation(*activation), shape)),
        LayerSpec::Dropout { .. } => Ok((Op::Identity, shape)),
        LayerSpec::Flatten => {
            let features = match shape {
                FeatureShape::Spatial {
                    channels,
                    height,
                    width,
                } => channels * height * width,
                FeatureShape::Flat(n) => n,
            };
            Ok((Op::Flatten, FeatureShape::Flat(features)))
        }
        LayerSpec::GlobalAveragePool2d => {
            let (c, _, _) = spatial(shape)?;
            Ok((Op::GlobalAveragePool, FeatureShape::Flat(c)))
        }
        LayerSpec::Dense {
            name,
            units,
            activation,
            use_bias,
        } => {
            let features = match shape {
                FeatureShape::Flat(n) => n,
                FeatureShape::Spatial { .. } => {
                    return Err("dense layer needs a flat input".to_string())
                }
            };
            let vb = vb.pp(name.as_str());
            let weight = vb.get((*units, features), "weight").map_err(|e| e.to_string())?;
            let bias = optional_bias(&vb, *use_bias, *units)?;
            Ok((
                Op::Dense {
                    linear: Linear::new(weight, bias),
                    activation: *activation,
                },
                FeatureShape::Flat(*units),
            ))
        }
    }
}

fn spatial(shape: FeatureShape) -> Result<(usize, usize, usize), String> {
    match shape {
        FeatureShape::Spatial {
            channels,
            height,
            width,
        } => Ok((channels, height, width)),
        FeatureShape::Flat(_) => Err("spatial layer after flattening".to_string()),
    }
}

fn conv_config(stride: usize, groups: usize) -> Conv2dConfig {
    Conv2dConfig {
        padding: 0,
        stride: stride.max(1),
        dilation: 1,
        groups,
        ..Default::default()
    }
}

fn optional_bias(vb: &VarBuilder, use_bias: bool, size: usize) -> Result<Option<Tensor>, String> {
    if !use_bias {
        return Ok(None);
    }
    vb.get(size, "bias").map(Some).map_err(|e| e.to_string())
}

fn fold_batch_norm(vb: &VarBuilder, channels: usize, epsilon: f64) -> CandleResult<(Tensor, Tensor)> {
    let gamma = vb.get(channels, "gamma")?;
    let beta = vb.get(channels, "beta")?;
    let mean = vb.get(channels, "running_mean")?;
    let var = vb.get(channels, "running_var")?;

    let scale = gamma.div(&var.affine(1.0, epsilon)?.sqrt()?)?;
    let shift = beta.sub(&mean.mul(&scale)?)?;
    Ok((scale, shift))
}

/// Padding and output size of a square convolution
fn conv_geometry(
    height: usize,
    width: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
) -> Result<(Pad, usize, usize), String> {
    let stride = stride.max(1);
    if kernel == 0 {
        return Err("kernel size must be positive".to_string());
    }
    match padding {
        Padding::Valid => {
            if kernel > height || kernel > width {
                return Err(format!("kernel {} does not fit {}x{}", kernel, height, width));
            }
            Ok((
                (0, 0, 0, 0),
                (height - kernel) / stride + 1,
                (width - kernel) / stride + 1,
            ))
        }
        Padding::Same => {
            let (top, bottom, oh) = same_padding(height, kernel, stride);
            let (left, right, ow) = same_padding(width, kernel, stride);
            Ok(((top, bottom, left, right), oh, ow))
        }
    }
}

/// Split of the total padding along one axis; the extra pixel goes after
fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize, usize) {
    let output = input.div_ceil(stride);
    let total = ((output - 1) * stride + kernel).saturating_sub(input);
    let before = total / 2;
    (before, total - before, output)
}

fn pad_spatial(x: &Tensor, (top, bottom, left, right): Pad) -> CandleResult<Tensor> {
    if top + bottom + left + right == 0 {
        return Ok(x.clone());
    }
    x.pad_with_zeros(2, top, bottom)?.pad_with_zeros(3, left, right)
}

fn apply_activation(x: &Tensor, activation: Activation) -> CandleResult<Tensor> {
    match activation {
        Activation::Linear => Ok(x.clone()),
        Activation::Relu => x.relu(),
        Activation::Sigmoid => x.neg()?.exp()?.affine(1.0, 1.0)?.recip(),
        Activation::Tanh => x.tanh(),
        Activation::Softmax => candle_nn::ops::softmax(x, x.rank() - 1),
    }
}
