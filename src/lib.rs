//! Image-quality benchmarking for text-to-image models
//!
//! This crate computes distribution-level and per-image quality metrics for
//! generative image models using the Candle ML framework:
//!
//! - **FID**: Fréchet Inception Distance between two sets of images, with
//!   directories, explicit file lists, precomputed statistics files and live
//!   generative models all accepted as inputs
//! - **CLIP score**: cosine similarity between image and caption embeddings
//! - **Aesthetic score**: learned MLP head over CLIP image embeddings
//! - **Reproducible**: explicit seed threaded through configuration, never
//!   ambient global state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use t2i_bench::extractor::ClipVisionExtractor;
//! use t2i_bench::pipeline::calculate_fid;
//! use t2i_bench::sources::FidInput;
//! use t2i_bench::FidConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let device = candle_core::Device::cuda_if_available(0)?;
//!     let extractor = ClipVisionExtractor::load(
//!         "models/clip.safetensors",
//!         device.clone(),
//!     )?;
//!
//!     let result = calculate_fid(
//!         FidInput::Directory("generations/".into()),
//!         FidInput::StatsFile("coco_stats.safetensors".into()),
//!         &extractor,
//!         &FidConfig::new(device),
//!     )?;
//!     println!("FID: {}", result.score);
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

pub mod aesthetic;
pub mod clip_score;
pub mod config;
pub mod download;
pub mod extractor;
pub mod frechet;
pub mod generate;
pub mod pipeline;
pub mod sources;
pub mod stats;

pub use config::{CancelToken, FidConfig};
pub use pipeline::{calculate_caption_fid, calculate_fid, FidResult};
pub use stats::DistributionStats;

/// Metric computation error variants.
///
/// Everything is fatal and propagates to the caller of `calculate_fid` /
/// `frechet_distance` with the offending path or magnitude attached. The one
/// internal retry is the bounded diagonal regularization inside the matrix
/// square root; when it runs out, `NumericalInstability` is surfaced.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("no images found in {0}")]
    EmptyInput(PathBuf),

    #[error("image path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("cannot parse statistics file {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("covariance needs at least 2 samples, got {0}")]
    InsufficientSamples(usize),

    #[error("matrix square root did not stabilize after {attempts} regularization attempts (max residual eigenvalue {magnitude:.3e})")]
    NumericalInstability { attempts: usize, magnitude: f64 },

    #[error("feature dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("caption set error: {0}")]
    CaptionSet(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
