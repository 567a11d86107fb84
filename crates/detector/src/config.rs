//! Detector configuration

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use preprocess::PreprocessConfig;
use serde::{Deserialize, Serialize};

use crate::DetectorError;

/// Default network weights, relative to the working directory
pub const DEFAULT_MODEL_PATH: &str = "model/conv_MLP_84.safetensors";

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Network weights (`.safetensors`, architecture in the sibling `.json`)
    pub model_path: PathBuf,

    /// Log level when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Preprocessing parameters
    pub preprocess: PreprocessConfig,

    /// Pending request capacity of the prediction worker
    pub worker_queue: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            log_level: "info".to_string(),
            log_json: false,
            preprocess: PreprocessConfig::default(),
            worker_queue: 16,
        }
    }
}

impl DetectorConfig {
    /// Load configuration: defaults, then `pneumonia.toml` (or `file`), then
    /// `PNEUMONIA__*` environment variables, then `MODEL_PATH`
    pub fn load(file: Option<&Path>) -> Result<Self, DetectorError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name("pneumonia").required(false),
        };

        let settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("PNEUMONIA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("model_path", std::env::var("MODEL_PATH").ok())
            .and_then(|builder| builder.build())
            .map_err(|e| DetectorError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| DetectorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.worker_queue == 0 {
            return Err(DetectorError::Config("worker_queue must be positive".to_string()));
        }
        self.preprocess
            .validate()
            .map_err(|e| DetectorError::Config(e.to_string()))
    }
}
