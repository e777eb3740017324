//! Feature extraction seam
//!
//! The FID pipeline only needs two capabilities from a feature extractor:
//! turn a decoded image into a preprocessed tensor, and map a batch of those
//! tensors to fixed-length embeddings. Both live behind [`FeatureExtractor`]
//! so test doubles can stand in for the real network.
//!
//! The shipped implementation is the CLIP ViT-B/32 vision tower. The original
//! FID formulation uses InceptionV3 pool3 features; CLIP embeddings are an
//! accepted substitute (often reported as "CLIP-FID") and reuse the same
//! weights as the CLIP-score metric.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip;
use image::DynamicImage;
use std::path::Path;
use tracing::info;

use crate::Result;

/// Maps images to fixed-length embedding vectors.
///
/// `forward_batch` must be deterministic given the model weights, and every
/// image source applies `preprocess` before handing tensors to it.
pub trait FeatureExtractor: Send + Sync {
    /// Embedding dimensionality D.
    fn feature_dim(&self) -> usize;

    /// Decode-side preprocessing: resize/normalize into a `(C, H, W)` f32
    /// tensor on the CPU. Called from the worker pool.
    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor>;

    /// Forward one `(B, C, H, W)` batch into `(B, D)` embeddings. Runs
    /// sequentially on the extractor's device.
    fn forward_batch(&self, batch: &Tensor) -> Result<Tensor>;
}

/// CLIP ViT-B/32 vision tower as a feature extractor.
pub struct ClipVisionExtractor {
    model: clip::ClipModel,
    device: Device,
}

/// ViT-B/32 projection dimension.
const CLIP_EMBED_DIM: usize = 512;
/// ViT-B/32 input resolution.
const CLIP_IMAGE_SIZE: u32 = 224;

impl ClipVisionExtractor {
    /// Load CLIP weights from a safetensors file.
    ///
    /// # Arguments
    /// * `model_path` - Path to model.safetensors (openai/clip-vit-base-patch32)
    /// * `device` - Device to load the model on
    pub fn load<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        info!(path = %model_path.display(), "Loading CLIP vision extractor");

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)?
        };
        let config = clip::ClipConfig::vit_base_patch32();
        let model = clip::ClipModel::new(vb, &config)?;

        info!("✓ CLIP extractor loaded successfully");
        Ok(Self { model, device })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl FeatureExtractor for ClipVisionExtractor {
    fn feature_dim(&self) -> usize {
        CLIP_EMBED_DIM
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        clip_preprocess(image, CLIP_IMAGE_SIZE)
    }

    fn forward_batch(&self, batch: &Tensor) -> Result<Tensor> {
        let batch = batch.to_device(&self.device)?;
        let features = self.model.get_image_features(&batch)?;
        Ok(features.to_dtype(DType::F32)?)
    }
}

/// CLIP input preprocessing: center-crop resize to `size`×`size`, then scale
/// pixel values into [-1, 1].
pub(crate) fn clip_preprocess(image: &DynamicImage, size: u32) -> Result<Tensor> {
    let image = image.resize_to_fill(size, size, image::imageops::FilterType::Triangle);
    let data = image.to_rgb8().into_raw();
    let tensor = Tensor::from_vec(data, (size as usize, size as usize, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2.0 / 255.0, -1.0)?;
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = DynamicImage::new_rgb8(640, 480);
        let tensor = clip_preprocess(&image, 224).unwrap();
        assert_eq!(tensor.dims(), &[3, 224, 224]);

        // All-black input maps to -1 everywhere under the [-1, 1] scaling.
        let flat = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|&v| (v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_white_maps_to_one() {
        let mut buf = image::RgbImage::new(32, 32);
        for p in buf.pixels_mut() {
            *p = image::Rgb([255, 255, 255]);
        }
        let tensor = clip_preprocess(&DynamicImage::ImageRgb8(buf), 224).unwrap();
        let flat = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
