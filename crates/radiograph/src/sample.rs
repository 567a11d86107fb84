//! Sample and model input types

use image::{GrayImage, RgbImage};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis};

use crate::ImagingError;

/// Channel layout of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// Single-channel H×W intensities
    Gray { height: usize, width: usize },
    /// Three-channel H×W×3 intensities
    Rgb { height: usize, width: usize },
}

impl SampleLayout {
    /// Get (height, width)
    pub fn dims(&self) -> (usize, usize) {
        match *self {
            SampleLayout::Gray { height, width } | SampleLayout::Rgb { height, width } => {
                (height, width)
            }
        }
    }
}

/// Decoded radiograph pixels, 8 bits per sample
///
/// Any array can be wrapped; `layout()` reports whether it is one of the two
/// shapes the pipeline accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pixels: ArrayD<u8>,
}

impl Sample {
    /// Wrap an arbitrary pixel array
    pub fn from_array(pixels: ArrayD<u8>) -> Self {
        Self { pixels }
    }

    /// Create an RGB sample from an H×W×3 array
    pub fn rgb(pixels: Array3<u8>) -> Self {
        Self {
            pixels: pixels.into_dyn(),
        }
    }

    /// Create a greyscale sample from an H×W array
    pub fn gray(pixels: Array2<u8>) -> Self {
        Self {
            pixels: pixels.into_dyn(),
        }
    }

    /// Create an RGB sample with every intensity set to `value`
    pub fn filled_rgb(height: usize, width: usize, value: u8) -> Self {
        Self::rgb(Array3::from_elem((height, width, 3), value))
    }

    /// Create an RGB sample from an image buffer
    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = Array3::from_shape_vec(
            (height as usize, width as usize, 3),
            image.as_raw().clone(),
        )
        .unwrap_or_else(|_| Array3::zeros((0, 0, 3)));
        Self::rgb(pixels)
    }

    /// Create a greyscale sample from an image buffer
    pub fn from_gray_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = Array2::from_shape_vec((height as usize, width as usize), image.as_raw().clone())
            .unwrap_or_else(|_| Array2::zeros((0, 0)));
        Self::gray(pixels)
    }

    /// Raw pixel array
    pub fn pixels(&self) -> &ArrayD<u8> {
        &self.pixels
    }

    /// Array shape
    pub fn shape(&self) -> &[usize] {
        self.pixels.shape()
    }

    /// Get the channel layout, or `None` if the shape is unsupported
    pub fn layout(&self) -> Option<SampleLayout> {
        match *self.pixels.shape() {
            [height, width] if height > 0 && width > 0 => Some(SampleLayout::Gray { height, width }),
            [height, width, 3] if height > 0 && width > 0 => Some(SampleLayout::Rgb { height, width }),
            _ => None,
        }
    }

    /// Replicate a greyscale sample to three channels; RGB samples are cloned
    pub fn to_rgb(&self) -> Option<Sample> {
        match self.layout()? {
            SampleLayout::Rgb { .. } => Some(self.clone()),
            SampleLayout::Gray { .. } => {
                let gray = self.pixels.view().insert_axis(Axis(2));
                let rgb = ndarray::concatenate(Axis(2), &[gray.view(), gray.view(), gray.view()]).ok()?;
                Some(Sample::from_array(rgb))
            }
        }
    }

    /// Convert to an RGB image buffer, replicating greyscale channels
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let rgb = self.to_rgb()?;
        let (height, width) = rgb.layout()?.dims();
        let raw: Vec<u8> = rgb.pixels.as_standard_layout().iter().copied().collect();
        RgbImage::from_raw(width as u32, height as u32, raw)
    }
}

/// Network input: a (1, H, W, 1) tensor of intensities in [0, 1]
///
/// Immutable once built; the data is always in standard (row-major) layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    data: Array4<f32>,
}

impl ModelInput {
    /// Wrap a batch-of-one, single-channel NHWC array
    pub fn from_array(data: Array4<f32>) -> Result<Self, ImagingError> {
        let (batch, height, width, channels) = data.dim();
        if batch != 1 || channels != 1 || height == 0 || width == 0 {
            return Err(ImagingError::InvalidInputShape {
                expected: "(1, H, W, 1)".to_string(),
                actual: format!("{:?}", data.shape()),
            });
        }
        Ok(Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Underlying NHWC array
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Flat row-major view of the values
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice().unwrap_or(&[])
    }

    /// Tensor shape as (batch, height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Spatial height
    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    /// Spatial width
    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// The single image plane as H×W
    pub fn plane(&self) -> Array2<f32> {
        self.data
            .index_axis(Axis(0), 0)
            .index_axis(Axis(2), 0)
            .to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use ndarray::IxDyn;
    use proptest::prelude::*;

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            Sample::filled_rgb(4, 6, 0).layout(),
            Some(SampleLayout::Rgb { height: 4, width: 6 })
        );
        assert_eq!(
            Sample::gray(Array2::zeros((3, 2))).layout(),
            Some(SampleLayout::Gray { height: 3, width: 2 })
        );
        assert_eq!(Sample::from_array(ArrayD::zeros(IxDyn(&[4, 4, 4]))).layout(), None);
        assert_eq!(Sample::from_array(ArrayD::zeros(IxDyn(&[16]))).layout(), None);
        assert_eq!(Sample::from_array(ArrayD::zeros(IxDyn(&[0, 4]))).layout(), None);
    }

    #[test]
    fn test_gray_to_rgb_image_replicates_channels() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(1, 0, Luma([200]));
        let rgb = Sample::from_gray_image(&gray).to_rgb_image().unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([200, 200, 200]));
        assert_eq!(*rgb.get_pixel(0, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_rgb_image_round_trip_keeps_pixel_order() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(1, 0, Rgb([10, 20, 30]));
        let sample = Sample::from_rgb_image(&image);
        assert_eq!(sample.shape(), &[2, 2, 3]);
        assert_eq!(sample.pixels()[[0, 1, 2]], 30);
        assert_eq!(sample.to_rgb_image().unwrap(), image);
    }

    #[test]
    fn test_model_input_rejects_bad_shape() {
        assert!(ModelInput::from_array(Array4::zeros((1, 8, 8, 1))).is_ok());
        assert!(ModelInput::from_array(Array4::zeros((2, 8, 8, 1))).is_err());
        assert!(ModelInput::from_array(Array4::zeros((1, 8, 8, 3))).is_err());
    }

    #[test]
    fn test_model_input_plane() {
        let mut data = Array4::zeros((1, 2, 3, 1));
        data[[0, 1, 2, 0]] = 0.5;
        let input = ModelInput::from_array(data).unwrap();
        let plane = input.plane();
        assert_eq!(plane.dim(), (2, 3));
        assert_eq!(plane[[1, 2]], 0.5);
        assert_eq!(input.as_slice().len(), 6);
    }

    proptest! {
        #[test]
        fn prop_gray_promotion_keeps_intensity(height in 1usize..24, width in 1usize..24, value in any::<u8>()) {
            let rgb = Sample::gray(Array2::from_elem((height, width), value)).to_rgb().unwrap();
            prop_assert_eq!(rgb.layout(), Some(SampleLayout::Rgb { height, width }));
            prop_assert!(rgb.pixels().iter().all(|&v| v == value));
        }
    }
}
