//! Radiograph Samples and Loading
//!
//! Provides the image data model shared by the detection pipeline:
//! - `Sample`: 8-bit RGB (H×W×3) or greyscale (H×W) pixel array
//! - `ModelInput`: the (1, H, W, 1) float tensor fed to the network
//! - `load`: DICOM and photographic (JPEG/PNG) decoding

pub mod dicom;
pub mod loader;
pub mod sample;

pub use loader::{load, load_dicom, load_photographic, SourceFormat};
pub use sample::{ModelInput, Sample, SampleLayout};

use thiserror::Error;

/// Side length of the square model input, in pixels
pub const MODEL_INPUT_SIZE: usize = 512;

/// Imaging error types
#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid model input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
}
