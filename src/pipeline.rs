//! FID pipeline orchestration
//!
//! This module ties the pieces together:
//! 1. Resolve both inputs (directory / file list / stats file / generator)
//! 2. Stream image batches through preprocessing and the feature extractor
//! 3. Reduce each feature stream to distribution statistics
//! 4. Compute the Fréchet distance between the two summaries
//!
//! Decode and preprocessing run on a worker pool sized by
//! `FidConfig::parallelism`; the extractor forward pass owns the compute
//! device and stays sequential. The two inputs are processed strictly in
//! order with no shared state. Lower-level failures propagate unchanged; the
//! only side effect is optional generation caching inside a generated source.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::FidConfig;
use crate::extractor::FeatureExtractor;
use crate::frechet::frechet_distance;
use crate::generate::{Caption, GeneratedSource, TextToImageModel};
use crate::sources::{FidInput, ResolvedInput};
use crate::stats::{DistributionStats, FeatureAccumulator};
use crate::{Error, Result};

/// Features and statistics recorded for one side of a comparison.
///
/// `features` is empty when the side was a precomputed statistics input, since
/// no extraction ran for it.
#[derive(Debug)]
pub struct InputArtifacts {
    pub features: Vec<Vec<f32>>,
    pub stats: DistributionStats,
}

/// Outcome of one `calculate_fid` invocation.
#[derive(Debug)]
pub struct FidResult {
    /// Fréchet distance, ≥ 0.
    pub score: f64,
    pub first: InputArtifacts,
    pub second: InputArtifacts,
}

/// Calculate the Fréchet Inception Distance between two sets of images.
///
/// Each input can be an image directory, an explicit list of files, a
/// persisted statistics file (skipping extraction for that side), in-memory
/// statistics, or a generative model over a caption set.
///
/// # Arguments
/// * `input_a`, `input_b` - The two sides of the comparison
/// * `extractor` - Feature extractor applied to every image
/// * `config` - Batch size, device, seed, worker count, cancellation
pub fn calculate_fid(
    input_a: FidInput,
    input_b: FidInput,
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
) -> Result<FidResult> {
    if let Some(seed) = config.seed {
        // Seeds the extractor device RNG; generated sources are seeded when
        // they are processed. No process-global state is touched.
        if let Err(e) = config.device.set_seed(seed) {
            debug!(error = %e, "Could not set device seed (CPU backend)");
        }
    }

    info!(input = %input_a, "Processing first input");
    let resolved_a = input_a.resolve(config)?;
    let first = extract_artifacts(resolved_a, extractor, config)?;

    info!(input = %input_b, "Processing second input");
    let resolved_b = input_b.resolve(config)?;
    let second = extract_artifacts(resolved_b, extractor, config)?;

    let score = frechet_distance(&first.stats, &second.stats)?;
    info!(fid = score, "FID computed");

    Ok(FidResult {
        score,
        first,
        second,
    })
}

/// FID of a generative model against a reference input, over a fixed caption
/// set.
///
/// Wraps the model and captions as a generated source (with optional on-disk
/// caching of generations) and delegates to [`calculate_fid`]. The reference
/// is typically a precomputed statistics file for a standard caption
/// benchmark set.
pub fn calculate_caption_fid(
    model: Box<dyn TextToImageModel>,
    captions: Vec<Caption>,
    reference: FidInput,
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
    cache_dir: Option<&Path>,
) -> Result<FidResult> {
    let mut source = GeneratedSource::new(model, captions);
    if let Some(dir) = cache_dir {
        std::fs::create_dir_all(dir)?;
        source = source.with_cache_dir(dir);
    }
    calculate_fid(reference, FidInput::Generator(source), extractor, config)
}

/// Extract features for a single input and keep only the reduced statistics.
///
/// Backs the `stats` precomputation workflow: run this once over a reference
/// directory, persist the result, and later FID runs against it skip the
/// extraction for that side entirely.
pub fn compute_stats(
    input: FidInput,
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
) -> Result<DistributionStats> {
    info!(input = %input, "Computing distribution statistics");
    let resolved = input.resolve(config)?;
    let artifacts = extract_artifacts(resolved, extractor, config)?;
    Ok(artifacts.stats)
}

fn extract_artifacts(
    input: ResolvedInput,
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
) -> Result<InputArtifacts> {
    match input {
        ResolvedInput::Stats(stats) => {
            debug!(samples = stats.sample_count(), "Using precomputed statistics");
            Ok(InputArtifacts {
                features: Vec::new(),
                stats,
            })
        }
        ResolvedInput::Images(paths) => extract_from_paths(&paths, extractor, config),
        ResolvedInput::Generated(mut source) => {
            if let Some(seed) = config.seed {
                source.apply_seed(seed);
            }
            extract_from_generator(source, extractor, config)
        }
    }
}

fn extract_from_paths(
    paths: &[PathBuf],
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
) -> Result<InputArtifacts> {
    let pool = worker_pool(config)?;
    let mut acc = FeatureAccumulator::new();
    let mut features = Vec::with_capacity(paths.len());
    let total_batches = paths.len().div_ceil(config.batch_size);

    for (i, batch) in paths.chunks(config.batch_size).enumerate() {
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

        consume_batch(tensors, extractor, &mut acc, &mut features)?;
        debug!(batch = i + 1, total = total_batches, "Extraction progress");
    }

    Ok(InputArtifacts {
        stats: acc.finish()?,
        features,
    })
}

fn extract_from_generator(
    mut source: GeneratedSource,
    extractor: &dyn FeatureExtractor,
    config: &FidConfig,
) -> Result<InputArtifacts> {
    let pool = worker_pool(config)?;
    let mut acc = FeatureAccumulator::new();
    let mut features = Vec::with_capacity(source.len());
    let indices: Vec<usize> = (0..source.len()).collect();

    for batch in indices.chunks(config.batch_size) {
        if config.cancelled() {
            return Err(Error::Cancelled);
        }

        // Generation owns the model (and possibly the device): sequential.
        let mut images = Vec::with_capacity(batch.len());
        for &i in batch {
            images.push(source.image_at(i)?);
        }

        let tensors = pool.install(|| {
            images
                .par_iter()
                .map(|image| extractor.preprocess(image))
                .collect::<Result<Vec<_>>>()
        })?;

        consume_batch(tensors, extractor, &mut acc, &mut features)?;
    }

    Ok(InputArtifacts {
        stats: acc.finish()?,
        features,
    })
}

/// Stack one preprocessed batch, run the extractor, and fold the resulting
/// rows into the accumulator and the artifact list.
fn consume_batch(
    tensors: Vec<candle_core::Tensor>,
    extractor: &dyn FeatureExtractor,
    acc: &mut FeatureAccumulator,
    features: &mut Vec<Vec<f32>>,
) -> Result<()> {
    let batch = candle_core::Tensor::stack(&tensors, 0)?;
    let embeddings = extractor.forward_batch(&batch)?;
    let rows: Vec<Vec<f32>> = embeddings.to_vec2()?;
    for row in &rows {
        acc.push(row)?;
    }
    features.extend(rows);
    Ok(())
}

fn worker_pool(config: &FidConfig) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism)
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}
