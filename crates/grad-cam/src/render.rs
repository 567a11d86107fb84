//! Heatmap colouring and compositing

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::map::{map_colors, map_colors2};
use ndarray::Array3;
use preprocess::resize_bilinear;
use radiograph::Sample;

use crate::saliency::SaliencyMap;
use crate::ExplainError;

/// Weight of the radiograph in the blend
pub const BASE_WEIGHT: f32 = 0.6;
/// Weight of the heatmap in the blend
pub const HEAT_WEIGHT: f32 = 0.4;

/// Heatmap composited onto the radiograph, 8-bit RGB
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay(RgbImage);

impl Overlay {
    pub fn image(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_image(self) -> RgbImage {
        self.0
    }

    /// (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.0.height() as usize, self.0.width() as usize, 3)
    }

    /// Pixels as an (H, W, 3) array
    pub fn to_array(&self) -> Array3<u8> {
        let (height, width, _) = self.shape();
        Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
            self.0.get_pixel(x as u32, y as u32)[c]
        })
    }
}

/// Jet colormap: blue through cyan, yellow and red
pub fn jet(value: u8) -> Rgb<u8> {
    let x = value as f32 / 255.0;
    let channel = |centre: f32| {
        let v = (1.5 - (4.0 * x - centre).abs()).clamp(0.0, 1.0);
        (255.0 * v).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Upsample a saliency map and colour it
pub fn heatmap(map: &SaliencyMap, size: usize) -> RgbImage {
    let upsampled = resize_bilinear(map.values(), size, size);
    let side = size as u32;
    let levels = GrayImage::from_fn(side, side, |x, y| {
        let v = upsampled[[y as usize, x as usize]];
        Luma([(255.0 * v.clamp(0.0, 1.0)) as u8])
    });
    map_colors(&levels, |Luma([v])| jet(v))
}

/// Blend a heatmap over the radiograph resized to the heatmap's size
pub fn composite(sample: &Sample, heat: &RgbImage) -> Result<Overlay, ExplainError> {
    let base = sample.to_rgb_image().ok_or_else(|| ExplainError::InvalidSample {
        shape: sample.shape().to_vec(),
    })?;
    let base = if base.dimensions() == heat.dimensions() {
        base
    } else {
        imageops::resize(&base, heat.width(), heat.height(), imageops::FilterType::Triangle)
    };

    let blended = map_colors2(&base, heat, |Rgb(b), Rgb(h)| {
        Rgb(std::array::from_fn(|c| {
            (BASE_WEIGHT * b[c] as f32 + HEAT_WEIGHT * h[c] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        }))
    });
    Ok(Overlay(blended))
}
