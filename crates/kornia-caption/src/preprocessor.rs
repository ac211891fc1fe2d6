use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, RgbImage};

use crate::error::CaptionError;

/// Read an image file of any supported format and convert it to rgb8.
///
/// # Arguments
///
/// * `file_path` - The path to the image file.
///
/// # Returns
///
/// The decoded image with 3 channels, whatever the channel layout of the file.
pub fn read_image_any_rgb8(file_path: impl AsRef<Path>) -> Result<RgbImage, CaptionError> {
    let file_path = file_path.as_ref();

    if !file_path.exists() {
        return Err(CaptionError::FileDoesNotExist(file_path.to_path_buf()));
    }

    let img = image::ImageReader::open(file_path)?
        .with_guessed_format()?
        .decode()?;

    Ok(img.to_rgb8())
}

/// Configuration of the image preprocessor of a captioning model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePreprocessorConfig {
    /// Side of the square input expected by the vision encoder.
    pub image_size: u32,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub rescale_factor: f64,
}

/// Maps a decoded rgb8 image to a normalized `[3, size, size]` tensor.
pub struct ImagePreprocessor {
    config: ImagePreprocessorConfig,
    mean: Tensor,
    std: Tensor,
}

impl ImagePreprocessor {
    pub fn new(config: ImagePreprocessorConfig, device: &Device) -> Result<Self, CaptionError> {
        let mean = Tensor::from_slice(&config.image_mean, (3, 1, 1), device)?;
        let std = Tensor::from_slice(&config.image_std, (3, 1, 1), device)?;
        Ok(Self { config, mean, std })
    }

    /// The side of the square tensor produced by [`Self::preprocess`].
    pub fn image_size(&self) -> u32 {
        self.config.image_size
    }

    /// Resize, rescale and normalize the image.
    ///
    /// # Arguments
    ///
    /// * `image` - The rgb8 image with shape [H, W, 3].
    /// * `dtype` - The dtype of the returned tensor.
    ///
    /// # Returns
    ///
    /// A tensor with shape [3, size, size] on the preprocessor device.
    pub fn preprocess(&self, image: &RgbImage, dtype: DType) -> Result<Tensor, CaptionError> {
        let size = self.config.image_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

        let image_t = Tensor::from_vec(
            resized.into_raw(),
            (size as usize, size as usize, 3),
            self.mean.device(),
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(self.config.rescale_factor, 0.)?
        .broadcast_sub(&self.mean)?
        .broadcast_div(&self.std)?
        .to_dtype(dtype)?;

        Ok(image_t)
    }
}
