//! Image Normalizer
//!
//! Turns uploaded image bytes into the fixed `[1, 224, 224, 3]` tensor the
//! classifiers expect: RGB, Lanczos resize (direct stretch, no crop), values
//! scaled to `[0, 1]`, NHWC layout.

use image::{imageops::FilterType, DynamicImage};

use crate::utils::error::{DermaError, Result};
use crate::INPUT_SIZE;

/// A single normalized image in NHWC layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    /// Number of color channels (RGB)
    pub const CHANNELS: usize = 3;

    /// Wrap an NHWC buffer of a single `height x width` RGB image
    pub fn from_nhwc(data: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        let expected = height * width * Self::CHANNELS;
        if data.len() != expected {
            return Err(DermaError::Preprocessing(format!(
                "tensor buffer has {} values, expected {} for {}x{}x{}",
                data.len(),
                expected,
                height,
                width,
                Self::CHANNELS
            )));
        }
        Ok(Self {
            data,
            height,
            width,
        })
    }

    /// Shape as `[batch, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, Self::CHANNELS]
    }

    /// Flat NHWC values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consume into the flat NHWC values
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Resize an image to the target dimensions
fn resize_image(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, FilterType::Lanczos3)
}

/// Scale RGB pixels to `[0, 1]` in HWC order
fn scale_pixels(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    rgb.pixels()
        .flat_map(|pixel| pixel.0)
        .map(|value| value as f32 / 255.0)
        .collect()
}

/// Normalize an already decoded image
pub fn normalize_image(image: &DynamicImage) -> Result<ImageTensor> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DermaError::Preprocessing(format!(
            "image has degenerate size {}x{}",
            image.width(),
            image.height()
        )));
    }

    // Grayscale, alpha and 16-bit modes all collapse to 8-bit RGB here.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let resized = resize_image(&rgb, INPUT_SIZE as u32, INPUT_SIZE as u32);

    ImageTensor::from_nhwc(scale_pixels(&resized), INPUT_SIZE, INPUT_SIZE)
}

/// Decode raw JPEG/PNG/WebP bytes and normalize them
pub fn normalize(raw_bytes: &[u8]) -> Result<ImageTensor> {
    if raw_bytes.is_empty() {
        return Err(DermaError::Preprocessing("empty upload".to_string()));
    }

    let image = image::load_from_memory(raw_bytes)
        .map_err(|e| DermaError::Preprocessing(e.to_string()))?;

    normalize_image(&image)
}
