//! Input resolution for the FID pipeline
//!
//! Four kinds of input are accepted: a directory of images, an explicit file
//! list, a persisted statistics file (which short-circuits feature extraction
//! entirely) and a live generative model. The kind is dispatched exactly once
//! at resolution time; the rest of the pipeline only ever sees a
//! `ResolvedInput`.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::FidConfig;
use crate::generate::GeneratedSource;
use crate::stats::{DistributionStats, STATS_EXTENSION};
use crate::{Error, Result};

/// File extensions enumerated when scanning a directory input.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// One side of a FID comparison.
pub enum FidInput {
    /// Directory of images. A path to a `.safetensors` file is accepted here
    /// too and treated as `StatsFile`, mirroring extension-based dispatch.
    Directory(PathBuf),
    /// Explicit list of image files; every path must exist.
    Files(Vec<PathBuf>),
    /// Persisted `DistributionStats`; skips feature extraction.
    StatsFile(PathBuf),
    /// Already-loaded statistics.
    Stats(DistributionStats),
    /// Generative model + caption set, images produced on demand.
    Generator(GeneratedSource),
}

impl FidInput {
    /// Build an input from a bare path, dispatching on the extension the way
    /// the CLI does: statistics container vs image directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if has_extension(&path, STATS_EXTENSION) {
            FidInput::StatsFile(path)
        } else {
            FidInput::Directory(path)
        }
    }

    /// Dispatch once into a pipeline-ready input.
    pub(crate) fn resolve(self, config: &FidConfig) -> Result<ResolvedInput> {
        match self {
            FidInput::Directory(path) => {
                if path.is_file() {
                    if has_extension(&path, STATS_EXTENSION) {
                        return Ok(ResolvedInput::Stats(DistributionStats::load(&path)?));
                    }
                    return Err(Error::UnsupportedInput(format!(
                        "{} is a file, not an image directory (expected a directory or a .{STATS_EXTENSION} statistics file)",
                        path.display()
                    )));
                }
                if !path.is_dir() {
                    return Err(Error::PathNotFound(path));
                }
                let images = images_in_directory(&path, config.recursive)?;
                if images.is_empty() {
                    return Err(Error::EmptyInput(path));
                }
                debug!(dir = %path.display(), count = images.len(), "Enumerated image directory");
                Ok(ResolvedInput::Images(images))
            }
            FidInput::Files(paths) => {
                if paths.is_empty() {
                    return Err(Error::UnsupportedInput(
                        "empty list of image paths".to_string(),
                    ));
                }
                validate_image_paths(&paths)?;
                Ok(ResolvedInput::Images(paths))
            }
            FidInput::StatsFile(path) => {
                if !path.is_file() {
                    return Err(Error::PathNotFound(path));
                }
                Ok(ResolvedInput::Stats(DistributionStats::load(&path)?))
            }
            FidInput::Stats(stats) => Ok(ResolvedInput::Stats(stats)),
            FidInput::Generator(source) => Ok(ResolvedInput::Generated(source)),
        }
    }
}

impl fmt::Display for FidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FidInput::Directory(p) => write!(f, "directory {}", p.display()),
            FidInput::Files(v) => write!(f, "list of {} image files", v.len()),
            FidInput::StatsFile(p) => write!(f, "statistics file {}", p.display()),
            FidInput::Stats(s) => write!(f, "precomputed stats ({} samples)", s.sample_count()),
            FidInput::Generator(g) => write!(f, "generator over {} captions", g.len()),
        }
    }
}

/// Input after one-shot resolution; no runtime type inspection past here.
pub(crate) enum ResolvedInput {
    Stats(DistributionStats),
    Images(Vec<PathBuf>),
    Generated(GeneratedSource),
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stats(stats) => f.debug_tuple("Stats").field(stats).finish(),
            Self::Images(paths) => f.debug_tuple("Images").field(paths).finish(),
            Self::Generated(_) => f.debug_tuple("Generated").finish(),
        }
    }
}

/// Enumerate image files under `dir`, sorted by path for deterministic
/// iteration order across runs.
pub fn images_in_directory(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    collect_images(dir, recursive, &mut images)?;
    images.sort();
    Ok(images)
}

fn collect_images(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_images(&path, recursive, out)?;
            }
        } else if is_image_path(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Check every path exists; fails with `PathNotFound` naming the first
/// offender.
pub fn validate_image_paths(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        if !path.is_file() {
            return Err(Error::PathNotFound(path.clone()));
        }
    }
    Ok(())
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
