//! CLIP score: image/caption agreement
//!
//! Mean cosine similarity between L2-normalized CLIP image embeddings and
//! caption embeddings under the joint vision-language model. Uses the same
//! ViT-B/32 weights as the FID extractor, plus the CLIP text tower and
//! tokenizer.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::FidConfig;
use crate::extractor::clip_preprocess;
use crate::sources::validate_image_paths;
use crate::{Error, Result};

const CLIP_IMAGE_SIZE: u32 = 224;
const CLIP_CONTEXT_LEN: usize = 77;
const CLIP_PAD_TOKEN: u32 = 49407; // <|endoftext|>

/// Full CLIP model (vision + text towers) for image/caption scoring.
pub struct ClipScorer {
    model: clip::ClipModel,
    tokenizer: tokenizers::Tokenizer,
    device: Device,
}

impl ClipScorer {
    /// Load CLIP weights and tokenizer.
    ///
    /// # Arguments
    /// * `model_path` - Path to model.safetensors (openai/clip-vit-base-patch32)
    /// * `tokenizer_path` - Path to tokenizer.json
    /// * `device` - Device to load the model on
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        tokenizer_path: P,
        device: Device,
    ) -> Result<Self> {
        info!(path = %model_path.as_ref().display(), "Loading CLIP scorer");

        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| Error::CaptionSet(format!("failed to load CLIP tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path.as_ref()], DType::F32, &device)?
        };
        let config = clip::ClipConfig::vit_base_patch32();
        let model = clip::ClipModel::new(vb, &config)?;

        info!("✓ CLIP scorer loaded successfully");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn tokenize(&self, captions: &[&str]) -> Result<Tensor> {
        let mut rows = Vec::with_capacity(captions.len());
        for caption in captions {
            let encoding = self
                .tokenizer
                .encode(*caption, true)
                .map_err(|e| Error::CaptionSet(format!("tokenization failed: {e}")))?;
            let mut ids = encoding.get_ids().to_vec();
            ids.truncate(CLIP_CONTEXT_LEN);
            ids.resize(CLIP_CONTEXT_LEN, CLIP_PAD_TOKEN);
            rows.push(ids);
        }
        let flat: Vec<u32> = rows.into_iter().flatten().collect();
        Ok(Tensor::from_vec(
            flat,
            (captions.len(), CLIP_CONTEXT_LEN),
            &self.device,
        )?)
    }
}

/// Mean CLIP score over (image, caption) pairs.
///
/// Every image path must exist; the first missing one fails with
/// `PathNotFound`. Batching follows `config.batch_size` and decode runs on
/// the worker pool, like the FID pipeline.
pub fn calculate_clip_score(
    pairs: &[(PathBuf, String)],
    scorer: &ClipScorer,
    config: &FidConfig,
) -> Result<f32> {
    if pairs.is_empty() {
        return Err(Error::UnsupportedInput(
            "empty list of image/caption pairs".to_string(),
        ));
    }
    let paths: Vec<PathBuf> = pairs.iter().map(|(p, _)| p.clone()).collect();
    validate_image_paths(&paths)?;

    if let Some(seed) = config.seed {
        if let Err(e) = config.device.set_seed(seed) {
            debug!(error = %e, "Could not set device seed (CPU backend)");
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism)
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    let mut score_acc = 0f32;
    let mut count = 0usize;

    for batch in pairs.chunks(config.batch_size) {
        if config.cancelled() {
            return Err(Error::Cancelled);
        }

        let tensors = pool.install(|| {
            batch
                .par_iter()
                .map(|(path, _)| {
                    let image = image::open(path)?;
                    clip_preprocess(&image, CLIP_IMAGE_SIZE)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let images = Tensor::stack(&tensors, 0)?.to_device(&config.device)?;

        let captions: Vec<&str> = batch.iter().map(|(_, c)| c.as_str()).collect();
        let token_ids = scorer.tokenize(&captions)?;

        let image_features = normalize_rows(&scorer.model.get_image_features(&images)?)?;
        let text_features = normalize_rows(&scorer.model.get_text_features(&token_ids)?)?;

        score_acc += cosine_sum(&image_features, &text_features)?;
        count += batch.len();
        debug!(scored = count, total = pairs.len(), "CLIP score progress");
    }

    let score = score_acc / count as f32;
    info!(clip_score = score, images = count, "CLIP score computed");
    Ok(score)
}

/// L2-normalize each row of a `(B, D)` tensor.
fn normalize_rows(features: &Tensor) -> Result<Tensor> {
    let features = features.to_dtype(DType::F32)?;
    let norms = features.sqr()?.sum_keepdim(1)?.sqrt()?;
    Ok(features.broadcast_div(&norms)?)
}

/// Sum of row-wise dot products of two equally shaped `(B, D)` tensors.
fn cosine_sum(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok((a * b)?.sum_all()?.to_scalar::<f32>()?)
}
