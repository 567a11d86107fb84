//! Command-line front end: classify one radiograph and save its heatmap

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use detector::{init_logging, Detector, DetectorConfig};
use tracing::info;

const IMAGE_EXTENSIONS: [&str; 4] = ["dcm", "jpg", "jpeg", "png"];
const SAMPLES_DIR: &str = "samples";

#[derive(Parser, Debug)]
#[command(name = "pneumonia-detector")]
#[command(about = "Classify a chest radiograph and render its Grad-CAM heatmap")]
struct Args {
    /// Radiograph to classify; the extension may be omitted
    #[arg(long, default_value = "samples/bacteria")]
    img: PathBuf,

    /// Directory for the heatmap image
    #[arg(long, default_value = "outputs")]
    out: PathBuf,

    /// Configuration file (defaults to ./pneumonia.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = DetectorConfig::load(args.config.as_deref())?;
    init_logging(&config.log_level, config.log_json)?;

    info!("=== Pneumonia Detector v{} ===", env!("CARGO_PKG_VERSION"));

    let Some(image_path) = resolve_image(&args.img) else {
        bail!("image not found: {}", args.img.display());
    };

    let (sample, _display) = radiograph::load(&image_path)
        .with_context(|| format!("failed to load {}", image_path.display()))?;
    let detector = Detector::from_config(&config)?;
    let result = detector.predict(&sample)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let heatmap_path = args.out.join(format!("heatmap_{}.png", stem));
    result
        .overlay
        .image()
        .save(&heatmap_path)
        .with_context(|| format!("failed to write {}", heatmap_path.display()))?;

    println!("Image: {}", image_path.display());
    println!("Prediction: {}", result.label);
    println!("Probability: {:.2}%", result.confidence);
    println!("Heatmap: {}", heatmap_path.display());
    Ok(())
}

/// Find the image as given or under `samples/`
///
/// Known extensions are only tried for names without one.
fn resolve_image(path: &Path) -> Option<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if let Some(name) = path.file_name() {
        candidates.push(Path::new(SAMPLES_DIR).join(name));
    }

    candidates.into_iter().find_map(|candidate| {
        if candidate.is_file() {
            return Some(candidate);
        }
        if candidate.extension().is_some() {
            return None;
        }
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| candidate.with_extension(ext))
            .find(|p| p.is_file())
    })
}
