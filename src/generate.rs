//! Generative-model inputs for the FID pipeline
//!
//! Image generation itself is an external capability; this module only
//! defines the narrow contract the pipeline needs (`generate(caption) ->
//! image`) and wraps a model + fixed caption set as a lazy image source with
//! optional on-disk caching. Cache files are keyed by the stable caption id,
//! so a prior run's generations are reused when available.

use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// A caption with a stable identifier.
///
/// The id keys generation caches and output filenames; it must be unique
/// within a caption set and stable across runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caption {
    pub id: String,
    pub text: String,
}

/// Narrow contract for a text-to-image model driven by the benchmark.
pub trait TextToImageModel {
    /// Produce one image for the caption. Must be deterministic for a fixed
    /// seed if the model honors `set_seed`.
    fn generate(&mut self, caption: &str) -> Result<DynamicImage>;

    /// Whether generated images may be cached to disk and replayed. Models
    /// whose output is not reproducible should return false.
    fn supports_caching(&self) -> bool {
        true
    }

    /// Reseed the model's sampler. Default is a no-op for deterministic
    /// models and test doubles.
    fn set_seed(&mut self, _seed: u64) {}
}

/// Load a caption set from a JSON object `{ "<id>": "<caption>", ... }`.
///
/// Entries come back sorted by id so iteration order is identical across
/// runs.
pub fn load_caption_set<P: AsRef<Path>>(path: P) -> Result<Vec<Caption>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let map: BTreeMap<String, String> = serde_json::from_str(&raw)
        .map_err(|e| Error::CaptionSet(format!("{}: {e}", path.display())))?;
    if map.is_empty() {
        return Err(Error::CaptionSet(format!(
            "{}: caption set is empty",
            path.display()
        )));
    }
    Ok(map
        .into_iter()
        .map(|(id, text)| Caption { id, text })
        .collect())
}

/// A generative model plus a fixed caption set, iterable as an image source.
pub struct GeneratedSource {
    model: Box<dyn TextToImageModel>,
    captions: Vec<Caption>,
    cache_dir: Option<PathBuf>,
}

impl GeneratedSource {
    pub fn new(model: Box<dyn TextToImageModel>, captions: Vec<Caption>) -> Self {
        Self {
            model,
            captions,
            cache_dir: None,
        }
    }

    /// Cache generations as `<dir>/<caption_id>.png` and reuse them on later
    /// runs. Only honored when the model supports caching.
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    pub fn captions(&self) -> &[Caption] {
        &self.captions
    }

    pub(crate) fn apply_seed(&mut self, seed: u64) {
        self.model.set_seed(seed);
    }

    /// Produce (or replay) the image for caption `index`.
    pub(crate) fn image_at(&mut self, index: usize) -> Result<DynamicImage> {
        let caption = self.captions[index].clone();

        let cache_path = match (&self.cache_dir, self.model.supports_caching()) {
            (Some(dir), true) => Some(dir.join(format!("{}.png", caption.id))),
            _ => None,
        };

        if let Some(path) = &cache_path {
            if path.is_file() {
                debug!(id = %caption.id, "Reusing cached generation");
                return Ok(image::open(path)?);
            }
        }

        let image = self.model.generate(&caption.text)?;

        if let Some(path) = &cache_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            image.save(path)?;
            debug!(id = %caption.id, path = %path.display(), "Cached generation");
        }
        Ok(image)
    }
}

impl std::fmt::Debug for GeneratedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSource")
            .field("captions", &self.captions.len())
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

/// Convenience constructor: model + caption-set JSON file + cache directory.
pub fn generated_input<P: AsRef<Path>>(
    model: Box<dyn TextToImageModel>,
    caption_file: P,
    cache_dir: Option<P>,
) -> Result<GeneratedSource> {
    let captions = load_caption_set(caption_file)?;
    info!(captions = captions.len(), "Loaded caption set");
    let mut source = GeneratedSource::new(model, captions);
    if let Some(dir) = cache_dir {
        source = source.with_cache_dir(dir);
    }
    Ok(source)
}
