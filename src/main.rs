//! CLI entry point for text-to-image quality metrics

use anyhow::Result;
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use t2i_bench::aesthetic::{calculate_aesthetic_score, AestheticPredictor};
use t2i_bench::clip_score::{calculate_clip_score, ClipScorer};
use t2i_bench::download::ModelDownloader;
use t2i_bench::extractor::ClipVisionExtractor;
use t2i_bench::pipeline::{calculate_fid, compute_stats};
use t2i_bench::sources::{images_in_directory, FidInput};
use t2i_bench::FidConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "t2i-bench")]
#[command(version = "0.1.0")]
#[command(about = "FID, CLIP score and aesthetic score for text-to-image models", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to CLIP model.safetensors; downloaded from the Hub when omitted
    #[arg(long)]
    clip_model: Option<PathBuf>,

    /// Images per extractor forward pass
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Worker threads for image decode and preprocessing
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Random seed for reproducible runs
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Force CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download required models (~600MB)
    ///
    /// Fetches CLIP ViT-B/32 weights and tokenizer from HuggingFace Hub.
    /// Files are cached; repeated runs reuse them.
    Download,

    /// Compute FID between two inputs
    ///
    /// Each input is either a directory of images or a .safetensors
    /// statistics file produced by the `stats` subcommand.
    Fid {
        /// First input (directory or stats file)
        input_a: PathBuf,

        /// Second input (directory or stats file)
        input_b: PathBuf,

        /// Recurse into subdirectories of directory inputs
        #[arg(long)]
        recursive: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Precompute distribution statistics for a directory of images
    ///
    /// The resulting .safetensors file can stand in for the directory in
    /// later `fid` runs, skipping feature extraction for that side.
    Stats {
        /// Directory of images
        input: PathBuf,

        /// Output statistics file (.safetensors)
        #[arg(short, long)]
        output: PathBuf,

        /// Recurse into subdirectories
        #[arg(long)]
        recursive: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Compute the mean CLIP score of images against their captions
    ClipScore {
        /// Directory of images
        images: PathBuf,

        /// JSON file mapping image file names to captions
        #[arg(short, long)]
        captions: PathBuf,

        /// Path to CLIP tokenizer.json; downloaded when omitted
        #[arg(long)]
        tokenizer: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Score images with the aesthetic predictor head
    AestheticScore {
        /// Directory of images
        images: PathBuf,

        /// Path to the aesthetic MLP checkpoint (.safetensors)
        #[arg(long)]
        head: PathBuf,

        /// Embedding size the head was trained on
        #[arg(long, default_value_t = 512)]
        input_dim: usize,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Download => {
            let downloader = ModelDownloader::new()?;
            let paths = downloader.download_all().await?;
            println!("CLIP weights:   {}", paths.clip_safetensors.display());
            println!("CLIP tokenizer: {}", paths.clip_tokenizer.display());
        }

        Commands::Fid {
            input_a,
            input_b,
            recursive,
            common,
        } => {
            let device = select_device(common.cpu)?;
            let mut config = build_config(&common, device.clone());
            config.recursive = recursive;
            let extractor = load_extractor(&common, device).await?;

            let result = calculate_fid(
                FidInput::from_path(&input_a),
                FidInput::from_path(&input_b),
                &extractor,
                &config,
            )?;
            println!("FID: {:.4}", result.score);
        }

        Commands::Stats {
            input,
            output,
            recursive,
            common,
        } => {
            let device = select_device(common.cpu)?;
            let mut config = build_config(&common, device.clone());
            config.recursive = recursive;
            let extractor = load_extractor(&common, device).await?;

            let stats = compute_stats(FidInput::Directory(input), &extractor, &config)?;
            stats.save(&output)?;
            println!(
                "Saved stats for {} images to {}",
                stats.sample_count(),
                output.display()
            );
        }

        Commands::ClipScore {
            images,
            captions,
            tokenizer,
            common,
        } => {
            let device = select_device(common.cpu)?;
            let config = build_config(&common, device.clone());

            let model_path = match &common.clip_model {
                Some(path) => path.clone(),
                None => ModelDownloader::new()?.download_clip().await?,
            };
            let tokenizer_path = match &tokenizer {
                Some(path) => path.clone(),
                None => ModelDownloader::new()?.download_clip_tokenizer().await?,
            };
            let scorer = ClipScorer::load(&model_path, &tokenizer_path, device)?;

            let pairs = caption_pairs(&images, &captions)?;
            let score = calculate_clip_score(&pairs, &scorer, &config)?;
            println!("CLIP score: {score:.4}");
        }

        Commands::AestheticScore {
            images,
            head,
            input_dim,
            common,
        } => {
            let device = select_device(common.cpu)?;
            let config = build_config(&common, device.clone());
            let extractor = load_extractor(&common, device.clone()).await?;
            let predictor = AestheticPredictor::load(&head, input_dim, &device)?;

            let paths = images_in_directory(&images, false)?;
            let result =
                calculate_aesthetic_score(&paths, &extractor, &predictor, &config)?;
            for (path, score) in &result.scores {
                println!("{:.4}  {}", score, path.display());
            }
            println!("mean: {:.4}", result.mean);
        }
    }

    Ok(())
}

fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        return Ok(Device::Cpu);
    }
    Ok(Device::cuda_if_available(0)?)
}

fn build_config(common: &CommonArgs, device: Device) -> FidConfig {
    FidConfig::new(device)
        .with_batch_size(common.batch_size)
        .with_seed(Some(common.seed))
        .with_parallelism(common.workers)
}

async fn load_extractor(common: &CommonArgs, device: Device) -> Result<ClipVisionExtractor> {
    let model_path = match &common.clip_model {
        Some(path) => path.clone(),
        None => ModelDownloader::new()?.download_clip().await?,
    };
    Ok(ClipVisionExtractor::load(&model_path, device)?)
}

/// Join an images directory with a filename→caption JSON map into
/// (path, caption) pairs.
fn caption_pairs(
    images: &PathBuf,
    captions: &PathBuf,
) -> Result<Vec<(PathBuf, String)>> {
    let raw = std::fs::read_to_string(captions)?;
    let map: std::collections::BTreeMap<String, String> = serde_json::from_str(&raw)?;
    Ok(map
        .into_iter()
        .map(|(name, caption)| (images.join(name), caption))
        .collect())
}
