//! Bandwidth estimation and variant selection.
//!
//! The estimate is the throughput of the most recent segment download. After
//! each download of a meta-playlist session the download coordinator asks
//! [`select_variant`] for the best variant of the same program that fits the
//! estimate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::VariantStream;

/// Last-sample throughput estimator, shared between threads.
#[derive(Debug)]
pub struct BandwidthEstimator {
    bits_per_sec: AtomicU64,
}

impl BandwidthEstimator {
    pub fn new(initial: u64) -> Self {
        Self {
            bits_per_sec: AtomicU64::new(initial),
        }
    }

    /// Current estimate in bits per second.
    pub fn estimate(&self) -> u64 {
        self.bits_per_sec.load(Ordering::Relaxed)
    }

    /// Record a finished transfer and return the new estimate.
    ///
    /// Returns `None` (estimate unchanged) when the transfer took less than a
    /// millisecond.
    pub fn on_segment_downloaded(&self, bytes: u64, elapsed: Duration) -> Option<u64> {
        let ms = elapsed.as_millis();
        if ms == 0 {
            debug!(bytes, "transfer too fast to measure");
            return None;
        }
        let bw = u64::try_from(u128::from(bytes) * 8 * 1000 / ms).unwrap_or(u64::MAX);
        self.bits_per_sec.store(bw, Ordering::Relaxed);
        debug!(bytes, elapsed_ms = ms as u64, bits_per_sec = bw, "bandwidth sample");
        Some(bw)
    }
}

/// Pick the variant with the largest bandwidth not above `estimate` among the
/// variants sharing the program of `variants[current]`. Ties keep the first
/// one in store order.
///
/// Returns `None` if nothing qualifies; callers keep the current variant then.
pub fn select_variant(
    variants: &[Arc<VariantStream>],
    current: usize,
    estimate: u64,
) -> Option<usize> {
    let program_id = variants.get(current)?.program_id();
    let mut candidate: Option<(usize, u64)> = None;

    for (i, v) in variants.iter().enumerate() {
        if v.program_id() != program_id || v.bandwidth() > estimate {
            continue;
        }
        if candidate.is_none_or(|(_, bw)| bw < v.bandwidth()) {
            candidate = Some((i, v.bandwidth()));
        }
    }
    candidate.map(|(i, _)| i)
}

/// Adaptation step run after a segment download.
///
/// Returns the index of the variant to switch to, or `None` to stay.
pub fn adapt(variants: &[Arc<VariantStream>], current: usize, estimate: u64) -> Option<usize> {
    let cur = variants.get(current)?;
    if cur.bandwidth() == estimate {
        return None;
    }
    match select_variant(variants, current, estimate) {
        Some(next) if next != current => {
            debug!(
                from = current,
                to = next,
                from_bandwidth = cur.bandwidth(),
                to_bandwidth = variants[next].bandwidth(),
                estimate,
                "variant switch"
            );
            Some(next)
        }
        _ => None,
    }
}

/// Warn when the measured throughput cannot sustain the variant: fetching
/// a segment would take longer than playing it.
pub fn check_download_time(duration_secs: u32, variant_bandwidth: u64, estimate: u64) -> bool {
    if estimate == 0 || duration_secs == 0 {
        return true;
    }
    let expected = u64::from(duration_secs) * variant_bandwidth / estimate;
    if expected > u64::from(duration_secs) {
        warn!(
            expected_secs = expected,
            duration_secs, variant_bandwidth, estimate, "downloading segment takes longer than playing it"
        );
        return false;
    }
    true
}
