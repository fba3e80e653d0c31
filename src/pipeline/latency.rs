//! In-memory histogram of snapshot transfer times for one run.
//! Recorded by the acquirer, reported in the run summary.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Download durations in milliseconds. Shared by all workers of a run.
pub struct TransferStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Percentiles {
    pub samples: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl TransferStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Result<Self> {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .map_err(|e| AppError::Config(format!("histogram bounds: {e}")))?;
        Ok(Self { inner: Mutex::new(histogram) })
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().clamp(1, 3_600_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(ms);
        }
    }

    /// None if nothing was downloaded.
    pub fn percentiles(&self) -> Option<Percentiles> {
        let h = self.inner.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        Some(Percentiles {
            samples: h.len(),
            p50_ms: h.value_at_quantile(0.5),
            p95_ms: h.value_at_quantile(0.95),
            p99_ms: h.value_at_quantile(0.99),
        })
    }
}
