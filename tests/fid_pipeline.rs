//! End-to-end FID pipeline tests with deterministic test doubles.
//!
//! The extractor stub embeds an image as its downsampled pixel values, so
//! identical images always produce identical features and the contract-level
//! properties (zero distance for identical inputs, stats short-circuiting,
//! generation caching) can be checked without real model weights.

use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use t2i_bench::extractor::FeatureExtractor;
use t2i_bench::generate::{Caption, TextToImageModel};
use t2i_bench::pipeline::{calculate_caption_fid, calculate_fid, compute_stats};
use t2i_bench::sources::FidInput;
use t2i_bench::{Error, FidConfig};

/// Embeds an image as its 4×4 downsampled RGB pixels (48-d features).
struct PixelExtractor;

impl FeatureExtractor for PixelExtractor {
    fn feature_dim(&self) -> usize {
        48
    }

    fn preprocess(&self, image: &DynamicImage) -> t2i_bench::Result<Tensor> {
        let small = image.resize_exact(4, 4, image::imageops::FilterType::Triangle);
        let data = small.to_rgb8().into_raw();
        let tensor = Tensor::from_vec(data, (4, 4, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(1.0 / 255.0, 0.0)?;
        Ok(tensor)
    }

    fn forward_batch(&self, batch: &Tensor) -> t2i_bench::Result<Tensor> {
        Ok(batch.flatten_from(1)?)
    }
}

/// Renders a solid image whose shade is a stable function of the caption.
struct SolidColorModel;

fn caption_shade(caption: &str) -> u8 {
    caption
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32)) as u8
}

fn solid_image(shade: u8) -> DynamicImage {
    let mut buf = RgbImage::new(16, 16);
    for p in buf.pixels_mut() {
        *p = Rgb([shade, shade.wrapping_add(40), shade.wrapping_add(80)]);
    }
    DynamicImage::ImageRgb8(buf)
}

impl TextToImageModel for SolidColorModel {
    fn generate(&mut self, caption: &str) -> t2i_bench::Result<DynamicImage> {
        Ok(solid_image(caption_shade(caption)))
    }
}

fn write_test_images(dir: &Path, count: usize) {
    for i in 0..count {
        let shade = (i * 23 % 256) as u8;
        solid_image(shade)
            .save(dir.join(format!("img_{i:03}.png")))
            .unwrap();
    }
}

fn test_config() -> FidConfig {
    FidConfig::new(Device::Cpu)
        .with_batch_size(4)
        .with_parallelism(2)
}

#[test]
fn identical_directories_give_zero_fid_and_full_artifacts() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    write_test_images(dir_a.path(), 10);
    write_test_images(dir_b.path(), 10);

    let result = calculate_fid(
        FidInput::Directory(dir_a.path().to_path_buf()),
        FidInput::Directory(dir_b.path().to_path_buf()),
        &PixelExtractor,
        &test_config(),
    )
    .unwrap();

    assert!(result.score < 1e-6, "score {}", result.score);
    assert_eq!(result.first.features.len(), 10);
    assert_eq!(result.second.features.len(), 10);
}

#[test]
fn directory_vs_its_own_stats_file_gives_zero() {
    let dir = tempfile::tempdir().unwrap();
    write_test_images(dir.path(), 10);
    let config = test_config();

    let stats = compute_stats(
        FidInput::Directory(dir.path().to_path_buf()),
        &PixelExtractor,
        &config,
    )
    .unwrap();
    let stats_path = dir.path().join("reference.safetensors");
    stats.save(&stats_path).unwrap();

    let result = calculate_fid(
        FidInput::Directory(dir.path().to_path_buf()),
        FidInput::from_path(&stats_path),
        &PixelExtractor,
        &config,
    )
    .unwrap();

    assert!(result.score < 1e-6, "score {}", result.score);
    assert_eq!(result.first.features.len(), 10);
    // The stats side never ran extraction.
    assert!(result.second.features.is_empty());
    assert_eq!(result.second.stats.sample_count(), 10);
}

#[test]
fn fid_is_symmetric_between_directories() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    write_test_images(dir_a.path(), 8);
    for i in 0..8 {
        solid_image((i * 31 % 256) as u8)
            .save(dir_b.path().join(format!("other_{i:03}.png")))
            .unwrap();
    }

    let config = test_config();
    let ab = calculate_fid(
        FidInput::Directory(dir_a.path().to_path_buf()),
        FidInput::Directory(dir_b.path().to_path_buf()),
        &PixelExtractor,
        &config,
    )
    .unwrap()
    .score;
    let ba = calculate_fid(
        FidInput::Directory(dir_b.path().to_path_buf()),
        FidInput::Directory(dir_a.path().to_path_buf()),
        &PixelExtractor,
        &config,
    )
    .unwrap()
    .score;

    assert!((ab - ba).abs() < 1e-9, "{ab} vs {ba}");
    assert!(ab > 0.0);
}

#[test]
fn explicit_file_list_matches_directory_input() {
    let dir = tempfile::tempdir().unwrap();
    write_test_images(dir.path(), 6);
    let files: Vec<_> = (0..6)
        .map(|i| dir.path().join(format!("img_{i:03}.png")))
        .collect();

    let result = calculate_fid(
        FidInput::Directory(dir.path().to_path_buf()),
        FidInput::Files(files),
        &PixelExtractor,
        &test_config(),
    )
    .unwrap();
    assert!(result.score < 1e-6, "score {}", result.score);
}

#[test]
fn generator_matches_prerendered_reference() {
    let captions: Vec<Caption> = (0..8)
        .map(|i| Caption {
            id: format!("{i:04}"),
            text: format!("a painting of subject number {i}"),
        })
        .collect();

    // Pre-render what the stub model will generate.
    let ref_dir = tempfile::tempdir().unwrap();
    for caption in &captions {
        solid_image(caption_shade(&caption.text))
            .save(ref_dir.path().join(format!("{}.png", caption.id)))
            .unwrap();
    }

    let cache_dir = tempfile::tempdir().unwrap();
    let result = calculate_caption_fid(
        Box::new(SolidColorModel),
        captions.clone(),
        FidInput::Directory(ref_dir.path().to_path_buf()),
        &PixelExtractor,
        &test_config(),
        Some(cache_dir.path()),
    )
    .unwrap();

    assert!(result.score < 1e-6, "score {}", result.score);
    // Every generation was cached under its caption id.
    for caption in &captions {
        assert!(cache_dir
            .path()
            .join(format!("{}.png", caption.id))
            .is_file());
    }
}

#[test]
fn mismatched_stats_dimensions_fail() {
    let narrow = t2i_bench::DistributionStats::from_features(
        [[1.0f32, 2.0].as_slice(), [3.0, 4.0].as_slice()],
    )
    .unwrap();
    let wide = t2i_bench::DistributionStats::from_features(
        [[1.0f32, 2.0, 3.0].as_slice(), [4.0, 5.0, 6.0].as_slice()],
    )
    .unwrap();

    let err = calculate_fid(
        FidInput::Stats(narrow),
        FidInput::Stats(wide),
        &PixelExtractor,
        &test_config(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch { left: 2, right: 3 }
    ));
}

#[test]
fn empty_directory_fails_before_extraction() {
    let empty = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    write_test_images(other.path(), 3);

    let err = calculate_fid(
        FidInput::Directory(empty.path().to_path_buf()),
        FidInput::Directory(other.path().to_path_buf()),
        &PixelExtractor,
        &test_config(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::EmptyInput(p) if p == empty.path()));
}
