//! Radiograph Preprocessing
//!
//! Turns a `Sample` into the network's fixed-shape input:
//! 1. RGB → luminance (greyscale passes through)
//! 2. Area-averaging resize to 512×512
//! 3. CLAHE (clip limit 2.0, 4×4 tiles)
//! 4. Scale to [0, 1]
//! 5. Reshape to (1, 512, 512, 1)
//!
//! The pipeline is pure and deterministic.

pub mod clahe;
pub mod resize;

pub use clahe::Clahe;
pub use resize::{resize_area, resize_bilinear};

use ndarray::{Array2, Axis};
use radiograph::{ImagingError, ModelInput, Sample, SampleLayout, MODEL_INPUT_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Preprocessing error types
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid sample shape {shape:?}: expected (H, W) or (H, W, 3)")]
    InvalidShape { shape: Vec<usize> },

    #[error("Invalid preprocessing configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Input(#[from] ImagingError),
}

/// Preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Output side length (pixels)
    pub size: usize,
    /// Apply local contrast enhancement
    pub use_clahe: bool,
    /// CLAHE clip limit
    pub clip_limit: f32,
    /// CLAHE tile grid (rows, cols)
    pub tile_grid: (usize, usize),
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            size: MODEL_INPUT_SIZE,
            use_clahe: true,
            clip_limit: 2.0,
            tile_grid: (4, 4),
        }
    }
}

impl PreprocessConfig {
    /// Skip contrast enhancement (resize and scale only)
    pub fn without_clahe() -> Self {
        Self {
            use_clahe: false,
            ..Default::default()
        }
    }

    /// Check that the configuration can produce a tensor
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.size == 0 {
            return Err(PreprocessError::Config("size must be positive".to_string()));
        }
        if self.use_clahe {
            let (rows, cols) = self.tile_grid;
            if rows == 0 || cols == 0 || rows > self.size || cols > self.size {
                return Err(PreprocessError::Config(format!(
                    "tile grid {:?} does not fit a {}px image",
                    self.tile_grid, self.size
                )));
            }
            if !self.clip_limit.is_finite() || self.clip_limit < 0.0 {
                return Err(PreprocessError::Config(format!(
                    "clip limit must be a non-negative number, got {}",
                    self.clip_limit
                )));
            }
        }
        Ok(())
    }
}

/// Sample-to-tensor preprocessor
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// Create a preprocessor with the given configuration
    pub fn with_config(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the configuration
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Run the full pipeline
    pub fn run(&self, sample: &Sample) -> Result<ModelInput, PreprocessError> {
        let gray = to_luminance(sample)?;
        let size = self.config.size;

        let resized = resize_area(&gray, size, size);
        let enhanced = if self.config.use_clahe {
            Clahe::new(self.config.clip_limit, self.config.tile_grid).apply(&resized)
        } else {
            resized
        };

        let scaled = enhanced.mapv(|v| v as f32 / 255.0);
        let tensor = scaled.insert_axis(Axis(2)).insert_axis(Axis(0));
        debug!("Preprocessed {:?} sample into {:?} tensor", sample.shape(), tensor.shape());

        Ok(ModelInput::from_array(tensor)?)
    }
}

/// Preprocess with the default configuration
pub fn preprocess(sample: &Sample) -> Result<ModelInput, PreprocessError> {
    Preprocessor::default().run(sample)
}

/// Reduce a sample to one luminance channel: 0.299 R + 0.587 G + 0.114 B
pub fn to_luminance(sample: &Sample) -> Result<Array2<u8>, PreprocessError> {
    let invalid = || PreprocessError::InvalidShape {
        shape: sample.shape().to_vec(),
    };
    let pixels = sample.pixels();

    match sample.layout().ok_or_else(invalid)? {
        SampleLayout::Gray { .. } => pixels
            .view()
            .into_dimensionality()
            .map(|plane| plane.to_owned())
            .map_err(|_| invalid()),
        SampleLayout::Rgb { height, width } => Ok(Array2::from_shape_fn((height, width), |(y, x)| {
            let r = pixels[[y, x, 0]] as f32;
            let g = pixels[[y, x, 1]] as f32;
            let b = pixels[[y, x, 2]] as f32;
            resize::saturate_u8(0.299 * r + 0.587 * g + 0.114 * b)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayD, IxDyn};
    use proptest::prelude::*;

    fn ramp_rgb(height: usize, width: usize) -> Sample {
        Sample::rgb(Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
            ((y * 3 + x * 5 + c * 40) % 256) as u8
        }))
    }

    fn assert_valid_tensor(input: &ModelInput) {
        assert_eq!(input.shape(), (1, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 1));
        assert!(input.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rgb_and_gray_produce_model_shape() {
        assert_valid_tensor(&preprocess(&ramp_rgb(600, 480)).unwrap());

        let gray = Sample::gray(Array2::from_shape_fn((300, 700), |(y, x)| ((x + y) % 256) as u8));
        assert_valid_tensor(&preprocess(&gray).unwrap());
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let sample = ramp_rgb(640, 512);
        let first = preprocess(&sample).unwrap();
        let second = preprocess(&sample).unwrap();
        let bits = |input: &ModelInput| input.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_constant_sample_gives_constant_tensor() {
        let input = preprocess(&Sample::filled_rgb(512, 512, 128)).unwrap();
        let first = input.as_slice()[0];
        assert!(first.is_finite());
        assert!(input.as_slice().iter().all(|&v| v == first));
    }

    #[test]
    fn test_black_sample_stays_black() {
        let input = preprocess(&Sample::filled_rgb(100, 100, 0)).unwrap();
        // A single-bin histogram still clips and redistributes, so black maps low but not
        // necessarily to zero; it must remain a constant plane.
        let first = input.as_slice()[0];
        assert!(first < 0.05);
        assert!(input.as_slice().iter().all(|&v| v == first));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let four_channels = Sample::from_array(ArrayD::zeros(IxDyn(&[8, 8, 4])));
        assert!(matches!(
            preprocess(&four_channels),
            Err(PreprocessError::InvalidShape { shape }) if shape == vec![8, 8, 4]
        ));

        let flat = Sample::from_array(ArrayD::zeros(IxDyn(&[64])));
        assert!(matches!(preprocess(&flat), Err(PreprocessError::InvalidShape { .. })));
    }

    #[test]
    fn test_luminance_weights() {
        let mut pixels = Array3::zeros((1, 3, 3));
        pixels[[0, 0, 0]] = 255;
        pixels[[0, 1, 1]] = 255;
        pixels[[0, 2, 2]] = 255;
        let gray = to_luminance(&Sample::rgb(pixels)).unwrap();
        assert_eq!(gray.row(0).to_vec(), vec![76, 150, 29]);
    }

    #[test]
    fn test_without_clahe_is_plain_scaling() {
        let preprocessor = Preprocessor::with_config(PreprocessConfig::without_clahe()).unwrap();
        let input = preprocessor.run(&Sample::filled_rgb(512, 512, 51)).unwrap();
        assert!(input.as_slice().iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_config_validation() {
        let bad_grid = PreprocessConfig {
            tile_grid: (0, 4),
            ..Default::default()
        };
        assert!(Preprocessor::with_config(bad_grid).is_err());

        let bad_size = PreprocessConfig {
            size: 0,
            ..Default::default()
        };
        assert!(Preprocessor::with_config(bad_size).is_err());

        let small = PreprocessConfig {
            size: 64,
            ..Default::default()
        };
        let input = Preprocessor::with_config(small).unwrap().run(&ramp_rgb(100, 80)).unwrap();
        assert_eq!(input.shape(), (1, 64, 64, 1));
    }

    #[test]
    fn test_loaded_photograph_ignores_display_image() {
        let image = image::RgbImage::from_fn(90, 70, |x, y| image::Rgb([(x * 2) as u8, (y * 3) as u8, 40]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chest.png");
        image.save(&path).unwrap();

        let (loaded, display) = radiograph::load(&path).unwrap();
        drop(display);
        let from_file = preprocess(&loaded).unwrap();
        let in_memory = preprocess(&Sample::from_rgb_image(&image)).unwrap();
        assert_eq!(from_file, in_memory);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_any_sample_yields_unit_range_tensor(
            height in 1usize..48,
            width in 1usize..48,
            rgb in any::<bool>(),
            seed in any::<u8>(),
        ) {
            let sample = if rgb {
                Sample::rgb(Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
                    (y * 31 + x * 17 + c * 7 + seed as usize) as u8
                }))
            } else {
                Sample::gray(Array2::from_shape_fn((height, width), |(y, x)| {
                    (y * 13 + x * 29 + seed as usize) as u8
                }))
            };
            let input = preprocess(&sample).unwrap();
            prop_assert_eq!(input.shape(), (1, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, 1));
            prop_assert!(input.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
