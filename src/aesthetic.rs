//! Aesthetic score: learned quality head over CLIP embeddings
//!
//! A small MLP (input→1024→128→64→16→1, dropout layers inert at inference)
//! regresses a scalar aesthetic rating from an L2-normalized CLIP image
//! embedding. Weight layout follows the LAION aesthetic predictor's
//! `Sequential` indices, so converted checkpoints load as
//! `layers.{0,2,4,6,7}.{weight,bias}`.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::FidConfig;
use crate::extractor::FeatureExtractor;
use crate::sources::validate_image_paths;
use crate::{Error, Result};

/// MLP head over CLIP image embeddings.
pub struct AestheticPredictor {
    layers: [Linear; 5],
    input_dim: usize,
}

impl AestheticPredictor {
    /// Load head weights from a safetensors checkpoint.
    ///
    /// # Arguments
    /// * `weights_path` - Path to the MLP checkpoint
    /// * `input_dim` - CLIP embedding size the head was trained on (768 for
    ///   ViT-L/14, 512 for ViT-B/32)
    /// * `device` - Device to load the head on
    pub fn load<P: AsRef<Path>>(
        weights_path: P,
        input_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        info!(path = %weights_path.as_ref().display(), input_dim, "Loading aesthetic head");

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
        };
        let layers = [
            linear(input_dim, 1024, vb.pp("layers.0"))?,
            linear(1024, 128, vb.pp("layers.2"))?,
            linear(128, 64, vb.pp("layers.4"))?,
            linear(64, 16, vb.pp("layers.6"))?,
            linear(16, 1, vb.pp("layers.7"))?,
        ];

        info!("✓ Aesthetic head loaded successfully");
        Ok(Self { layers, input_dim })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Score a `(B, D)` batch of L2-normalized embeddings into `B` scalars.
    pub fn score_embeddings(&self, embeddings: &Tensor) -> Result<Vec<f32>> {
        let mut x = embeddings.to_dtype(DType::F32)?;
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        let scores: Vec<Vec<f32>> = x.to_vec2()?;
        Ok(scores.into_iter().map(|row| row[0]).collect())
    }
}

/// Per-image aesthetic scores plus their mean.
#[derive(Debug)]
pub struct AestheticResult {
    pub scores: Vec<(PathBuf, f32)>,
    pub mean: f32,
}

/// Score every image with the aesthetic head over extractor embeddings.
///
/// The extractor's feature dimension must match the head's input dimension;
/// a mismatch fails with `DimensionMismatch` before any extraction runs.
pub fn calculate_aesthetic_score(
    image_paths: &[PathBuf],
    extractor: &dyn FeatureExtractor,
    predictor: &AestheticPredictor,
    config: &FidConfig,
) -> Result<AestheticResult> {
    if image_paths.is_empty() {
        return Err(Error::UnsupportedInput(
            "empty list of image paths".to_string(),
        ));
    }
    if extractor.feature_dim() != predictor.input_dim() {
        return Err(Error::DimensionMismatch {
            left: extractor.feature_dim(),
            right: predictor.input_dim(),
        });
    }
    validate_image_paths(image_paths)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism)
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    let mut scores = Vec::with_capacity(image_paths.len());

    for batch in image_paths.chunks(config.batch_size) {
        if config.cancelled() {
            return Err(Error::Cancelled);
        }

        let tensors = pool.install(|| {
            batch
                .par_iter()
                .map(|path| {
                    let image = image::open(path)?;
                    extractor.preprocess(&image)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let stacked = Tensor::stack(&tensors, 0)?;
        let embeddings = extractor.forward_batch(&stacked)?;
        // The head is trained on normalized embeddings.
        let norms = embeddings.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = embeddings.broadcast_div(&norms)?;

        let batch_scores = predictor.score_embeddings(&normalized)?;
        for (path, score) in batch.iter().zip(batch_scores) {
            scores.push((path.clone(), score));
        }
        debug!(scored = scores.len(), total = image_paths.len(), "Aesthetic progress");
    }

    let mean = scores.iter().map(|(_, s)| s).sum::<f32>() / scores.len() as f32;
    info!(mean_score = mean, images = scores.len(), "Aesthetic score computed");
    Ok(AestheticResult { scores, mean })
}
