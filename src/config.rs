//! Pipeline configuration
//!
//! Everything that used to be an implicit global in metric scripts (device,
//! seed, worker count) is carried explicitly here so that concurrent
//! invocations stay isolated.

use candle_core::Device;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked at every batch boundary.
///
/// Cancelling mid-pipeline discards partial results; the pipeline returns
/// `Error::Cancelled` instead of a score.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Configuration for one FID / CLIP-score invocation.
#[derive(Clone, Debug)]
pub struct FidConfig {
    /// Number of images per extractor forward pass.
    pub batch_size: usize,
    /// Device the feature extractor runs on. Exclusively owned by the
    /// extractor for the duration of one `calculate_fid` call.
    pub device: Device,
    /// When set, seeds the device RNG and any generated source before input
    /// resolution, so repeated runs with identical inputs produce identical
    /// statistics.
    pub seed: Option<u64>,
    /// Worker threads for image decode + preprocessing. Extraction itself is
    /// always sequential on `device`.
    pub parallelism: usize,
    /// Recurse into subdirectories when resolving a directory input.
    pub recursive: bool,
    /// Checked at each batch boundary; optional.
    pub cancel: Option<CancelToken>,
}

impl FidConfig {
    pub fn new(device: Device) -> Self {
        Self {
            batch_size: 32,
            device,
            seed: Some(42),
            parallelism: 8,
            recursive: false,
            cancel: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers.max(1);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// True once the attached token (if any) has been cancelled.
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_batch_size_floor() {
        let config = FidConfig::new(Device::Cpu).with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }
}
