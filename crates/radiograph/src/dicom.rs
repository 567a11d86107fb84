//! DICOM pixel decoding
//!
//! Reads the first frame of native (uncompressed) monochrome pixel data,
//! applies the modality rescale and photometric correction, and renders the
//! result to 8 bits.

use std::path::Path;

use dicom_core::value::{PrimitiveValue, Value};
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject};
use image::GrayImage;
use ndarray::Array2;
use tracing::{debug, info};

use crate::ImagingError;

/// Photometric interpretation of monochrome pixel data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Photometric {
    /// Low values render bright (inverted polarity)
    Monochrome1,
    /// Low values render dark
    Monochrome2,
    /// Anything else, passed through unchanged
    Other(String),
}

impl Photometric {
    /// Parse the attribute value (trailing padding is ignored)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "MONOCHROME1" => Photometric::Monochrome1,
            "MONOCHROME2" => Photometric::Monochrome2,
            other => Photometric::Other(other.to_string()),
        }
    }

    /// Whether `max - value` must be applied
    pub fn is_inverted(&self) -> bool {
        matches!(self, Photometric::Monochrome1)
    }
}

/// Modality rescale: `stored * slope + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f32,
    pub intercept: f32,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    /// Whether the rescale changes any value
    pub fn is_identity(&self) -> bool {
        self.slope == 1.0 && self.intercept == 0.0
    }
}

/// Stored pixel representation of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub rows: usize,
    pub columns: usize,
    pub bits_allocated: u16,
    pub signed: bool,
}

impl PixelLayout {
    fn samples(&self) -> usize {
        self.rows * self.columns
    }
}

/// Read a DICOM file into a greyscale 8-bit rendering
pub fn read_file(path: &Path) -> Result<Array2<u8>, ImagingError> {
    let obj = open_file(path)
        .map_err(|e| ImagingError::Decode(format!("unreadable DICOM {}: {}", path.display(), e)))?;

    let layout = pixel_layout(&obj)?;
    let stored = stored_values(&obj, &layout)?;
    let rescale = Rescale {
        slope: optional_float(&obj, tags::RESCALE_SLOPE)?.unwrap_or(1.0),
        intercept: optional_float(&obj, tags::RESCALE_INTERCEPT)?.unwrap_or(0.0),
    };
    let photometric = optional_string(&obj, tags::PHOTOMETRIC_INTERPRETATION)?
        .map(|value| Photometric::parse(&value))
        .unwrap_or(Photometric::Other(String::new()));

    info!(
        "Decoded DICOM {}x{} ({} bits, {:?})",
        layout.columns, layout.rows, layout.bits_allocated, photometric
    );

    render_monochrome(stored, layout.rows, layout.columns, rescale, &photometric)
}

/// Apply rescale and polarity correction, then normalize to [0, 255] as
/// `(v - min) / max(max - min, 1) * 255`
///
/// A flat image (or one without finite values) renders all zero.
pub fn render_monochrome(
    mut values: Vec<f32>,
    rows: usize,
    columns: usize,
    rescale: Rescale,
    photometric: &Photometric,
) -> Result<Array2<u8>, ImagingError> {
    if values.len() != rows * columns || values.is_empty() {
        return Err(ImagingError::Decode(format!(
            "pixel data holds {} values, expected {}x{}",
            values.len(),
            rows,
            columns
        )));
    }

    if !rescale.is_identity() {
        for value in values.iter_mut() {
            *value = *value * rescale.slope + rescale.intercept;
        }
    }

    if photometric.is_inverted() {
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for value in values.iter_mut() {
            *value = max - *value;
        }
    }

    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    let pixels: Vec<u8> = if !range.is_finite() || range <= 0.0 {
        debug!("Flat or non-finite pixel range, rendering black");
        vec![0; values.len()]
    } else {
        // Ranges below one unit are not stretched to full scale
        let denominator = range.max(1.0);
        values
            .iter()
            .map(|&v| ((v - min) / denominator * 255.0).clamp(0.0, 255.0) as u8)
            .collect()
    };

    Array2::from_shape_vec((rows, columns), pixels)
        .map_err(|e| ImagingError::Decode(e.to_string()))
}

/// Convert an H×W array into a displayable greyscale image
pub fn to_gray_image(pixels: &Array2<u8>) -> Result<GrayImage, ImagingError> {
    let (rows, columns) = pixels.dim();
    let raw: Vec<u8> = pixels.iter().copied().collect();
    GrayImage::from_raw(columns as u32, rows as u32, raw)
        .ok_or_else(|| ImagingError::Decode("pixel buffer size mismatch".to_string()))
}

/// Decode stored sample bytes of one frame into floats
pub fn decode_bytes(bytes: &[u8], layout: &PixelLayout) -> Result<Vec<f32>, ImagingError> {
    let count = layout.samples();
    match layout.bits_allocated {
        8 => {
            let frame = bytes.get(..count).ok_or_else(|| truncated(bytes.len(), count))?;
            Ok(frame
                .iter()
                .map(|&b| if layout.signed { b as i8 as f32 } else { b as f32 })
                .collect())
        }
        16 => {
            let frame = bytes
                .get(..count * 2)
                .ok_or_else(|| truncated(bytes.len(), count * 2))?;
            Ok(frame
                .chunks_exact(2)
                .map(|pair| {
                    let raw = u16::from_le_bytes([pair[0], pair[1]]);
                    if layout.signed {
                        raw as i16 as f32
                    } else {
                        raw as f32
                    }
                })
                .collect())
        }
        bits => Err(ImagingError::Decode(format!(
            "unsupported bits allocated: {}",
            bits
        ))),
    }
}

fn truncated(actual: usize, expected: usize) -> ImagingError {
    ImagingError::Decode(format!(
        "pixel data truncated: {} bytes, expected at least {}",
        actual, expected
    ))
}

fn pixel_layout(obj: &DefaultDicomObject) -> Result<PixelLayout, ImagingError> {
    let samples_per_pixel = optional_int(obj, tags::SAMPLES_PER_PIXEL)?.unwrap_or(1);
    if samples_per_pixel != 1 {
        return Err(ImagingError::Decode(format!(
            "unsupported samples per pixel: {}",
            samples_per_pixel
        )));
    }

    let rows = required_int(obj, tags::ROWS, "Rows")? as usize;
    let columns = required_int(obj, tags::COLUMNS, "Columns")? as usize;
    if rows == 0 || columns == 0 {
        return Err(ImagingError::Decode("empty image matrix".to_string()));
    }

    Ok(PixelLayout {
        rows,
        columns,
        bits_allocated: optional_int(obj, tags::BITS_ALLOCATED)?.unwrap_or(16) as u16,
        signed: optional_int(obj, tags::PIXEL_REPRESENTATION)?.unwrap_or(0) == 1,
    })
}

fn stored_values(obj: &DefaultDicomObject, layout: &PixelLayout) -> Result<Vec<f32>, ImagingError> {
    let element = obj
        .element_opt(tags::PIXEL_DATA)
        .map_err(|e| ImagingError::Decode(e.to_string()))?
        .ok_or_else(|| ImagingError::Decode("no pixel data".to_string()))?;

    let count = layout.samples();
    match element.value() {
        Value::Primitive(PrimitiveValue::U8(bytes)) => decode_bytes(bytes, layout),
        // Implicit VR stores 8-bit samples packed into OW words
        Value::Primitive(PrimitiveValue::U16(words)) if layout.bits_allocated == 8 => {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            decode_bytes(&bytes, layout)
        }
        Value::Primitive(PrimitiveValue::I16(words)) if layout.bits_allocated == 8 => {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            decode_bytes(&bytes, layout)
        }
        Value::Primitive(PrimitiveValue::U16(words)) if layout.bits_allocated == 16 => {
            if words.len() < count {
                return Err(truncated(words.len() * 2, count * 2));
            }
            Ok(words
                .iter()
                .take(count)
                .map(|&w| if layout.signed { w as i16 as f32 } else { w as f32 })
                .collect())
        }
        Value::Primitive(PrimitiveValue::I16(words)) if layout.bits_allocated == 16 => {
            if words.len() < count {
                return Err(truncated(words.len() * 2, count * 2));
            }
            Ok(words.iter().take(count).map(|&w| w as f32).collect())
        }
        Value::PixelSequence(_) => Err(ImagingError::Decode(
            "encapsulated (compressed) pixel data is not supported".to_string(),
        )),
        _ => Err(ImagingError::Decode(
            "pixel data has an unexpected value representation".to_string(),
        )),
    }
}

fn required_int(obj: &DefaultDicomObject, tag: Tag, name: &str) -> Result<u32, ImagingError> {
    optional_int(obj, tag)?.ok_or_else(|| ImagingError::Decode(format!("missing attribute {}", name)))
}

fn optional_int(obj: &DefaultDicomObject, tag: Tag) -> Result<Option<u32>, ImagingError> {
    match obj.element_opt(tag).map_err(|e| ImagingError::Decode(e.to_string()))? {
        Some(element) => element
            .to_int::<u32>()
            .map(Some)
            .map_err(|e| ImagingError::Decode(format!("attribute {}: {}", tag, e))),
        None => Ok(None),
    }
}

fn optional_float(obj: &DefaultDicomObject, tag: Tag) -> Result<Option<f32>, ImagingError> {
    match obj.element_opt(tag).map_err(|e| ImagingError::Decode(e.to_string()))? {
        Some(element) => match element.to_float64() {
            Ok(value) => Ok(Some(value as f32)),
            Err(e) => {
                debug!("Ignoring unreadable attribute {}: {}", tag, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

fn optional_string(obj: &DefaultDicomObject, tag: Tag) -> Result<Option<String>, ImagingError> {
    match obj.element_opt(tag).map_err(|e| ImagingError::Decode(e.to_string()))? {
        Some(element) => element
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|e| ImagingError::Decode(format!("attribute {}: {}", tag, e))),
        None => Ok(None),
    }
}

/// Writes small Part 10 files for decoder tests
#[cfg(test)]
pub(crate) mod fixture {
    use dicom_core::value::{PrimitiveValue, C};
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::uids;
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

    use super::*;

    pub(crate) struct DicomFixture {
        pub transfer_syntax: &'static str,
        pub layout: PixelLayout,
        pub photometric: &'static str,
        pub rescale: Option<Rescale>,
        /// Little-endian stored samples
        pub pixel_data: Vec<u8>,
    }

    impl DicomFixture {
        pub(crate) fn mono(layout: PixelLayout, photometric: &'static str, pixel_data: Vec<u8>) -> Self {
            Self {
                transfer_syntax: uids::EXPLICIT_VR_LITTLE_ENDIAN,
                layout,
                photometric,
                rescale: None,
                pixel_data,
            }
        }

        pub(crate) fn implicit(mut self) -> Self {
            self.transfer_syntax = uids::IMPLICIT_VR_LITTLE_ENDIAN;
            self
        }

        pub(crate) fn write(&self, path: &Path) {
            let layout = &self.layout;
            let mut obj = InMemDicomObject::new_empty();
            obj.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, dicom_value!(U16, [1])));
            obj.put(DataElement::new(tags::ROWS, VR::US, dicom_value!(U16, [layout.rows as u16])));
            obj.put(DataElement::new(tags::COLUMNS, VR::US, dicom_value!(U16, [layout.columns as u16])));
            obj.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, dicom_value!(U16, [layout.bits_allocated])));
            obj.put(DataElement::new(tags::BITS_STORED, VR::US, dicom_value!(U16, [layout.bits_allocated])));
            obj.put(DataElement::new(tags::HIGH_BIT, VR::US, dicom_value!(U16, [layout.bits_allocated - 1])));
            obj.put(DataElement::new(
                tags::PIXEL_REPRESENTATION,
                VR::US,
                dicom_value!(U16, [layout.signed as u16]),
            ));
            obj.put(DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from(self.photometric),
            ));
            if let Some(rescale) = self.rescale {
                obj.put(DataElement::new(
                    tags::RESCALE_SLOPE,
                    VR::DS,
                    PrimitiveValue::from(rescale.slope.to_string().as_str()),
                ));
                obj.put(DataElement::new(
                    tags::RESCALE_INTERCEPT,
                    VR::DS,
                    PrimitiveValue::from(rescale.intercept.to_string().as_str()),
                ));
            }

            let pixels = if layout.bits_allocated == 16 {
                let words: Vec<u16> = self
                    .pixel_data
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(C::from_vec(words)))
            } else {
                DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(self.pixel_data.clone()))
            };
            obj.put(pixels);

            let file = obj
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(self.transfer_syntax)
                        .media_storage_sop_class_uid(uids::DIGITAL_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION)
                        .media_storage_sop_instance_uid("2.25.1234567890"),
                )
                .unwrap();
            file.write_to_file(path).unwrap();
        }
    }

    pub(crate) fn layout(rows: usize, columns: usize, bits_allocated: u16, signed: bool) -> PixelLayout {
        PixelLayout {
            rows,
            columns,
            bits_allocated,
            signed,
        }
    }
}
