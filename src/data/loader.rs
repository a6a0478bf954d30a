// ============================================================
// Layer 4 — Raster Loader
// ============================================================
// Reads rasters for the inference pipeline with a fixed retry
// policy:
//
//   attempt 1 ─fail─► sleep ─► attempt 2 ─fail─► sleep ─► attempt 3
//                                                           │
//                                   still failing → error ◄─┘
//
// Network filesystems and object-store mounts occasionally
// hiccup, so a read error is first treated as transient. After
// the last attempt the error is returned and the caller decides
// what to do (the inference dataset records it and moves on).
//
// The delay is a plain blocking sleep on the worker thread that
// hit the error; there is no backoff.
//
// All knobs live in RasterIoConfig and are handed over at
// construction. Nothing here reads or sets environment variables.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::domain::raster::RasterSample;
use crate::domain::traits::RasterSource;
use crate::infra::geotiff::{GeoTiffReadOptions, GeoTiffSource, GeoTiffWriteOptions};

// ─── RasterIoConfig ───────────────────────────────────────────────────────────
/// Explicit raster I/O settings for one run.
#[derive(Debug, Clone)]
pub struct RasterIoConfig {
    /// Total read attempts per file (first try included)
    pub read_attempts: usize,

    /// Sleep between attempts
    pub retry_delay: Duration,

    /// Leading bands kept per raster. Some(3) keeps RGB out of
    /// multispectral stacks; None keeps every band.
    pub band_limit: Option<usize>,

    /// Output tile edge in pixels
    pub block_size: u32,

    /// Decoder buffer limit per raster
    pub max_decode_bytes: usize,
}

impl Default for RasterIoConfig {
    fn default() -> Self {
        Self {
            read_attempts:    3,
            retry_delay:      Duration::from_secs(1),
            band_limit:       Some(3),
            block_size:       256,
            max_decode_bytes: 512 * 1024 * 1024,
        }
    }
}

impl RasterIoConfig {
    pub fn read_options(&self) -> GeoTiffReadOptions {
        GeoTiffReadOptions {
            band_limit:       self.band_limit,
            max_decode_bytes: self.max_decode_bytes,
        }
    }

    pub fn write_options(&self) -> GeoTiffWriteOptions {
        GeoTiffWriteOptions { block_size: self.block_size }
    }

    /// GeoTIFF reader wrapped in this config's retry policy
    pub fn loader(&self) -> RetryingSource<GeoTiffSource> {
        RetryingSource::new(
            GeoTiffSource::new(self.read_options()),
            self.read_attempts,
            self.retry_delay,
        )
    }
}

// ─── RetryingSource ───────────────────────────────────────────────────────────
/// Wraps any RasterSource with bounded, fixed-delay retries.
pub struct RetryingSource<S> {
    inner:    S,
    attempts: usize,
    delay:    Duration,
}

impl<S: RasterSource> RetryingSource<S> {
    pub fn new(inner: S, attempts: usize, delay: Duration) -> Self {
        // Zero attempts would never read anything
        Self { inner, attempts: attempts.max(1), delay }
    }
}

impl<S: RasterSource> RasterSource for RetryingSource<S> {
    fn read(&self, path: &Path) -> Result<RasterSample> {
        let mut attempt = 1;
        loop {
            match self.inner.read(path) {
                Ok(sample) => return Ok(sample),
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(
                        "Retry {}/{} for '{}': {:#}",
                        attempt, self.attempts, path.display(), e
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to read '{}' after {} attempts: {:#}",
                        path.display(), self.attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::raster::{GeoTransform, Georeference};

    /// Fails a fixed number of times, then succeeds
    struct FlakySource {
        failures_left: AtomicUsize,
        calls:         AtomicUsize,
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            Self { failures_left: AtomicUsize::new(failures), calls: AtomicUsize::new(0) }
        }
    }

    impl RasterSource for FlakySource {
        fn read(&self, path: &Path) -> Result<RasterSample> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("transient read error");
            }
            let georef = Georeference::new(None, GeoTransform::IDENTITY, 2, 2);
            RasterSample::new(path, vec![0.0; 4], 1, georef)
        }
    }

    #[test]
    fn test_recovers_within_attempt_budget() {
        let source = RetryingSource::new(FlakySource::new(2), 3, Duration::ZERO);
        assert!(source.read(Path::new("flaky.tif")).is_ok());
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_after_last_attempt() {
        let source = RetryingSource::new(FlakySource::new(10), 3, Duration::ZERO);
        let err    = source.read(Path::new("broken.tif")).unwrap_err();

        assert!(err.to_string().contains("transient read error"));
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_policy() {
        let cfg = RasterIoConfig::default();
        assert_eq!(cfg.read_attempts, 3);
        assert_eq!(cfg.band_limit, Some(3));
        assert_eq!(cfg.write_options().block_size, 256);
    }
}
