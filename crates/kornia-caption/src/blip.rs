use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::blip;
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::RgbImage;
use log::debug;
use tokenizers::Tokenizer;

use crate::backend::CaptionBackend;
use crate::error::CaptionError;
use crate::preprocessor::{ImagePreprocessor, ImagePreprocessorConfig};

/// Configuration for the Blip captioning model
#[derive(Debug, Clone)]
pub struct BlipConfig {
    /// Maximum length of the generated sequence, including the start token.
    pub sample_len: usize,
    pub seed: u64,
    /// Optional path to a local safetensors file. If provided, it is used instead of
    /// downloading the weights from HuggingFace Hub.
    pub weights_path: Option<PathBuf>,
    /// Optional path to a local `tokenizer.json`.
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            sample_len: 50,
            seed: 299792458,
            weights_path: None,
            tokenizer_path: None,
        }
    }
}

/// The Blip model
///
/// This struct contains the Salesforce Blip model for generating a caption from an image.
/// Generation is greedy, so the same image always yields the same caption.
pub struct Blip {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    preprocessor: ImagePreprocessor,
    config: BlipConfig,
    device: Device,
}

impl Blip {
    const MODEL_IDENTIFIER: &'static str = "Salesforce/blip-image-captioning-large";
    // the safetensors weights only live on this revision
    const MODEL_REVISION: &'static str = "refs/pr/18";
    const DTYPE: DType = DType::F32;
    const BOS_TOKEN_ID: u32 = 30522;
    const SEP_TOKEN_ID: u32 = 102;
    const IMG_PROCESSOR_CONFIG: ImagePreprocessorConfig = ImagePreprocessorConfig {
        image_size: 384,
        image_mean: [0.48145466, 0.4578275, 0.40821073],
        image_std: [0.26862954, 0.26130258, 0.27577711],
        rescale_factor: 1.0 / 255.0,
    };

    /// Create a new Blip model on the given device
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the Blip model
    /// * `device` - The device to load the weights onto
    ///
    /// # Returns
    ///
    /// The loaded model, or the first error hit while fetching the tokenizer or the weights.
    pub fn new(config: BlipConfig, device: &Device) -> Result<Self, CaptionError> {
        let start = Instant::now();

        let (model, tokenizer) = Self::load_model(&config, device)?;
        let preprocessor = ImagePreprocessor::new(Self::IMG_PROCESSOR_CONFIG, device)?;

        debug!("Blip loaded in {:.2}s", start.elapsed().as_secs_f64());

        Ok(Self {
            model,
            tokenizer,
            preprocessor,
            config,
            device: device.clone(),
        })
    }

    /// Run the text decoder on the image embeddings until the separator token or
    /// `sample_len` is reached.
    ///
    /// # Arguments
    ///
    /// * `image_t` - The preprocessed image with shape [1, 3, 384, 384]
    ///
    /// # Returns
    ///
    /// * `caption` - The generated caption
    pub fn generate(&mut self, image_t: &Tensor) -> Result<String, CaptionError> {
        // every request starts from an empty cache
        self.model.reset_kv_cache();
        let mut logits_processor =
            LogitsProcessor::from_sampling(self.config.seed, Sampling::ArgMax);

        let image_embeds = image_t.apply(self.model.vision_model())?;

        let start_gen = Instant::now();
        let mut token_ids = vec![Self::BOS_TOKEN_ID];
        for index in 0..self.config.sample_len.saturating_sub(1) {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = self
                .model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?
                .squeeze(0)?;
            let logits = logits.i(logits.dim(0)? - 1)?.to_dtype(DType::F32)?;

            let token = logits_processor.sample(&logits)?;
            if token == Self::SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }

        let generated = token_ids.len() - 1;
        debug!(
            "{generated} tokens generated ({:.2} token/s)",
            generated as f64 / start_gen.elapsed().as_secs_f64()
        );

        let caption = self.tokenizer.decode(&token_ids[1..], true)?;
        Ok(caption.trim().to_string())
    }

    // utility function to load the model
    fn load_model(
        config: &BlipConfig,
        device: &Device,
    ) -> Result<(blip::BlipForConditionalGeneration, Tokenizer), CaptionError> {
        let tokenizer_filename = match &config.tokenizer_path {
            Some(path) => path.clone(),
            None => Api::new()?
                .model(Self::MODEL_IDENTIFIER.to_string())
                .get("tokenizer.json")?,
        };

        let weights_filename = match &config.weights_path {
            Some(path) => path.clone(),
            None => {
                debug!(
                    "Loading model from HuggingFace Hub: {}",
                    Self::MODEL_IDENTIFIER
                );
                Api::new()?
                    .repo(Repo::with_revision(
                        Self::MODEL_IDENTIFIER.to_string(),
                        RepoType::Model,
                        Self::MODEL_REVISION.to_string(),
                    ))
                    .get("model.safetensors")?
            }
        };

        let tokenizer = Tokenizer::from_file(tokenizer_filename)?;

        let blip_config = blip::Config::image_captioning_large();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], Self::DTYPE, device)?
        };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;

        Ok((model, tokenizer))
    }
}

impl CaptionBackend for Blip {
    fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError> {
        let image_t = self
            .preprocessor
            .preprocess(image, Self::DTYPE)?
            .unsqueeze(0)?;
        self.generate(&image_t)
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn missing_local_weights_fail_to_load() {
        let config = BlipConfig {
            weights_path: Some("/no/such/model.safetensors".into()),
            tokenizer_path: Some("/no/such/tokenizer.json".into()),
            ..Default::default()
        };
        assert!(Blip::new(config, &Device::Cpu).is_err());
    }

    // cargo test -p kornia-caption test_blip_caption -- --nocapture --ignored
    #[test]
    #[ignore = "Requires downloading the model weights"]
    fn test_blip_caption() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut model = Blip::new(BlipConfig::default(), &Device::Cpu).unwrap();

        let image = RgbImage::from_fn(384, 384, |x, _| {
            if x < 192 {
                Rgb([20, 90, 200])
            } else {
                Rgb([240, 240, 240])
            }
        });

        let first = model.caption(&image).unwrap();
        let second = model.caption(&image).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}
