//! Model downloader for HuggingFace Hub
//!
//! Fetches the weights the metrics need:
//! - CLIP ViT-B/32 (~600MB safetensors), shared by the FID extractor and
//!   the CLIP score
//! - CLIP tokenizer (~2MB)
//!
//! Files land in the hf-hub cache; repeated runs reuse them.

use anyhow::{Context, Result};
use hf_hub::api::tokio::Api;
use std::path::PathBuf;
use tracing::info;

/// CLIP repo id. The refs/pr/15 revision carries safetensors weights.
const CLIP_REPO: &str = "openai/clip-vit-base-patch32";
const CLIP_REVISION: &str = "refs/pr/15";

/// Model downloader that caches weights through the HuggingFace Hub.
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    /// Create a new model downloader.
    ///
    /// Uses the HF_TOKEN environment variable if set for gated models.
    pub fn new() -> Result<Self> {
        let api = Api::new().context("Failed to create HuggingFace API client")?;
        Ok(Self { api })
    }

    /// Download everything the metrics need.
    pub async fn download_all(&self) -> Result<ModelPaths> {
        info!("Downloading CLIP ViT-B/32 weights and tokenizer");

        let (clip_safetensors, clip_tokenizer) =
            tokio::try_join!(self.download_clip(), self.download_clip_tokenizer())?;

        info!("✓ All models downloaded successfully!");
        Ok(ModelPaths {
            clip_safetensors,
            clip_tokenizer,
        })
    }

    /// Download CLIP ViT-B/32 safetensors (~600MB).
    pub async fn download_clip(&self) -> Result<PathBuf> {
        info!("Downloading CLIP ViT-B/32 (~600MB)");

        let repo = self.api.repo(hf_hub::Repo::with_revision(
            CLIP_REPO.to_string(),
            hf_hub::RepoType::Model,
            CLIP_REVISION.to_string(),
        ));
        let path = repo
            .get("model.safetensors")
            .await
            .context("Failed to download CLIP safetensors")?;

        info!("  ✓ CLIP weights downloaded: {}", path.display());
        Ok(path)
    }

    /// Download the CLIP tokenizer (~2MB).
    pub async fn download_clip_tokenizer(&self) -> Result<PathBuf> {
        info!("Downloading CLIP tokenizer (~2MB)");

        let repo = self
            .api
            .repo(hf_hub::Repo::model(CLIP_REPO.to_string()));
        let path = repo
            .get("tokenizer.json")
            .await
            .context("Failed to download CLIP tokenizer")?;

        info!("  ✓ CLIP tokenizer downloaded: {}", path.display());
        Ok(path)
    }
}

/// Paths to all downloaded models.
pub struct ModelPaths {
    pub clip_safetensors: PathBuf,
    pub clip_tokenizer: PathBuf,
}
