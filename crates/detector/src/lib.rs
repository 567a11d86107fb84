//! Pneumonia Detector
//!
//! Single entry point for collaborators (CLI, GUI, batch jobs):
//! `Detector::predict(&Sample) -> PredictionResult` carrying the label, the
//! confidence in percent, and a Grad-CAM overlay.

pub mod config;
pub mod shared;
pub mod worker;

pub use config::{DetectorConfig, DEFAULT_MODEL_PATH};
pub use worker::{PredictionHandle, PredictionWorker};

use std::sync::Arc;
use std::time::Instant;

use classifier::{label_for, Model, ModelError, Probabilities, LABELS, UNKNOWN_LABEL};
use grad_cam::{ExplainError, Overlay};
use preprocess::{PreprocessError, Preprocessor};
use radiograph::{ImagingError, Sample};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Detector error types
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Explain(#[from] ExplainError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Prediction worker unavailable: {0}")]
    Worker(String),
}

/// Outcome of one prediction
#[derive(Debug, Clone)]
pub struct PredictionResult {
    /// Class name, or `"unknown"` when no class could be selected
    pub label: &'static str,
    /// Probability of the predicted class, in percent [0, 100]
    pub confidence: f32,
    /// Grad-CAM heatmap blended onto the radiograph
    pub overlay: Overlay,
    /// Predicted class index
    pub class_index: Option<usize>,
    /// Full class distribution
    pub probabilities: Probabilities,
}

/// Classifies radiographs and explains each prediction
pub struct Detector {
    model: Arc<dyn Model>,
    preprocessor: Preprocessor,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("layers", &self.model.layer_kinds().len())
            .field("preprocessor", &self.preprocessor)
            .finish()
    }
}

impl Detector {
    /// Create a detector with default preprocessing
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self::with_preprocessor(model, Preprocessor::default())
    }

    /// Create a detector with custom preprocessing
    pub fn with_preprocessor(model: Arc<dyn Model>, preprocessor: Preprocessor) -> Self {
        Self { model, preprocessor }
    }

    /// Create a detector on the process-wide network
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let network = shared::shared_network(&config.model_path)?;
        let preprocessor = Preprocessor::with_config(config.preprocess.clone())?;
        Ok(Self::with_preprocessor(network, preprocessor))
    }

    /// Get the model
    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    /// Classify a sample and explain the prediction
    pub fn predict(&self, sample: &Sample) -> Result<PredictionResult, DetectorError> {
        let start = Instant::now();

        let input = self.preprocessor.run(sample)?;
        debug!("Preprocessing took {:?}", start.elapsed());

        let probabilities = self.model.classify(&input)?;
        let class_index = probabilities.argmax();
        let label = match class_index {
            Some(index) if index < LABELS.len() => label_for(index),
            other => {
                warn!("No label for class index {:?} of {:?}", other, probabilities);
                UNKNOWN_LABEL
            }
        };
        let confidence = confidence_percent(&probabilities);

        let overlay = grad_cam::explain(sample, &input, self.model.as_ref())?;

        info!(
            "Prediction: {} ({:.2}%) in {:?}",
            label,
            confidence,
            start.elapsed()
        );
        Ok(PredictionResult {
            label,
            confidence,
            overlay,
            class_index,
            probabilities,
        })
    }
}

/// Largest class probability as a percentage, clamped to [0, 100]
pub fn confidence_percent(probabilities: &Probabilities) -> f32 {
    probabilities
        .max()
        .map(|p| (100.0 * p).clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, json: bool) -> Result<(), DetectorError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| DetectorError::Config(format!("invalid log level {:?}: {}", level, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| DetectorError::Config(format!("failed to set tracing subscriber: {}", e)))
}
