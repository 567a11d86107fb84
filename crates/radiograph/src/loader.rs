//! Radiograph loading from disk

use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::{DynamicImage, ImageReader};
use ndarray::{Array3, Axis};
use tracing::{debug, info};

use crate::{dicom, ImagingError, Sample};

/// Offset of the `DICM` magic in a Part 10 file
const DICOM_MAGIC_OFFSET: usize = 128;

/// Source file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Medical-imaging container (DICOM Part 10)
    Dicom,
    /// JPEG, PNG and other formats the `image` crate decodes
    Photographic,
}

impl SourceFormat {
    /// Detect the format from the extension, falling back to the file header
    pub fn detect(path: &Path) -> Result<Self, ImagingError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("dcm") | Some("dicom") => Ok(SourceFormat::Dicom),
            Some("jpg") | Some("jpeg") | Some("png") | Some("bmp") | Some("tif") | Some("tiff") => {
                Ok(SourceFormat::Photographic)
            }
            _ => {
                let mut header = [0u8; DICOM_MAGIC_OFFSET + 4];
                let mut file = File::open(path).map_err(|e| io_error(path, e))?;
                let read = file.read(&mut header).map_err(|e| io_error(path, e))?;
                if read == header.len() && &header[DICOM_MAGIC_OFFSET..] == b"DICM" {
                    Ok(SourceFormat::Dicom)
                } else {
                    Ok(SourceFormat::Photographic)
                }
            }
        }
    }
}

/// Load a radiograph into a `Sample` plus a display-ready rendering
pub fn load(path: impl AsRef<Path>) -> Result<(Sample, DynamicImage), ImagingError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ImagingError::Decode(format!("file not found: {}", path.display())));
    }

    match SourceFormat::detect(path)? {
        SourceFormat::Dicom => load_dicom(path),
        SourceFormat::Photographic => load_photographic(path),
    }
}

/// Load a DICOM file
///
/// The display image is the single-channel rendering; the sample replicates
/// it to three channels.
pub fn load_dicom(path: impl AsRef<Path>) -> Result<(Sample, DynamicImage), ImagingError> {
    let path = path.as_ref();
    let gray = dicom::read_file(path)?;
    let display = dicom::to_gray_image(&gray)?;

    let plane = gray.insert_axis(Axis(2));
    let rgb: Array3<u8> = ndarray::concatenate(Axis(2), &[plane.view(), plane.view(), plane.view()])
        .map_err(|e| ImagingError::Decode(e.to_string()))?;

    info!("Loaded DICOM radiograph {}", path.display());
    Ok((Sample::rgb(rgb), DynamicImage::ImageLuma8(display)))
}

/// Load a JPEG/PNG file as RGB
pub fn load_photographic(path: impl AsRef<Path>) -> Result<(Sample, DynamicImage), ImagingError> {
    let path = path.as_ref();
    let decoded = ImageReader::open(path)
        .map_err(|e| io_error(path, e))?
        .with_guessed_format()
        .map_err(|e| io_error(path, e))?
        .decode()
        .map_err(|e| ImagingError::Decode(format!("{}: {}", path.display(), e)))?;

    let rgb = decoded.to_rgb8();
    debug!("Decoded {}x{} photographic image", rgb.width(), rgb.height());

    let sample = Sample::from_rgb_image(&rgb);
    info!("Loaded photographic radiograph {}", path.display());
    Ok((sample, DynamicImage::ImageRgb8(rgb)))
}

fn io_error(path: &Path, err: std::io::Error) -> ImagingError {
    ImagingError::Decode(format!("{}: {}", path.display(), err))
}
