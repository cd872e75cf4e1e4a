//! The network-quality detector (§4.8): a bounded ring of latency/outcome samples feeding three
//! EWMAs, classified into a hysteresis-smoothed [`Quality`] level.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

/// One observed request outcome, fed into the detector and never retained by the caller (§3).
#[derive(Debug, Clone, Copy)]
pub struct NetworkQualitySample {
    pub latency_ms: f64,
    pub total_ms: f64,
    pub was_timeout: bool,
    pub was_transport_failure: bool,
    pub bytes_transferred: u64,
    pub was_success: bool,
}

/// Network-quality classification, ordered from best to worst. Threshold checks in
/// [`NetworkQualityDetector::classify`] test in this order, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Quality {
    Excellent = 0,
    Good = 1,
    Fair = 2,
    Poor = 3,
}

impl Quality {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Quality::Excellent,
            1 => Quality::Good,
            2 => Quality::Fair,
            _ => Quality::Poor,
        }
    }
}

/// A lock-free-readable summary of the detector's current state, published after every
/// `add_sample` call.
#[derive(Debug, Clone, Copy)]
pub struct NetworkQualitySnapshot {
    pub quality: Quality,
    pub ewma_latency_ms: f64,
    pub timeout_ratio: f64,
    pub success_ratio: f64,
    pub sample_count: usize,
}

/// Per-level thresholds: a window qualifies for a level when its EWMA latency, timeout ratio,
/// and success ratio all meet that level's bounds.
struct Thresholds {
    max_latency_ms: f64,
    max_timeout_ratio: f64,
    min_success_ratio: f64,
}

const THRESHOLDS: [Thresholds; 3] = [
    // Excellent
    Thresholds { max_latency_ms: 150.0, max_timeout_ratio: 0.01, min_success_ratio: 0.99 },
    // Good
    Thresholds { max_latency_ms: 400.0, max_timeout_ratio: 0.05, min_success_ratio: 0.95 },
    // Fair
    Thresholds { max_latency_ms: 1000.0, max_timeout_ratio: 0.15, min_success_ratio: 0.85 },
];

fn meets(t: &Thresholds, latency: f64, timeout_ratio: f64, success_ratio: f64) -> bool {
    latency <= t.max_latency_ms && timeout_ratio <= t.max_timeout_ratio && success_ratio >= t.min_success_ratio
}

struct Published {
    ewma_latency_ms: AtomicU64,
    timeout_ratio: AtomicU64,
    success_ratio: AtomicU64,
    sample_count: AtomicU64,
    quality: AtomicU8,
}

impl Published {
    fn new() -> Self {
        Self {
            ewma_latency_ms: AtomicU64::new(0f64.to_bits()),
            timeout_ratio: AtomicU64::new(0f64.to_bits()),
            success_ratio: AtomicU64::new(1f64.to_bits()),
            sample_count: AtomicU64::new(0),
            quality: AtomicU8::new(Quality::Excellent as u8),
        }
    }
}

struct Windows {
    samples: VecDeque<NetworkQualitySample>,
    capacity: usize,
    ewma_latency_ms: f64,
    timeout_ratio: f64,
    success_ratio: f64,
    /// Candidate classification and how many consecutive windows have supported moving to it.
    pending: Option<(Quality, u32)>,
    current: Quality,
}

/// Bounded ring buffer of samples (default capacity 64) feeding three EWMAs with hysteresis-
/// smoothed classification (§4.8). Snapshots are readable without taking the internal mutex.
pub struct NetworkQualityDetector {
    alpha: f64,
    hysteresis_k: u32,
    windows: Mutex<Windows>,
    published: Published,
}

impl NetworkQualityDetector {
    pub fn new(capacity: usize, alpha: f64, hysteresis_k: u32) -> Self {
        Self {
            alpha,
            hysteresis_k: hysteresis_k.max(1),
            windows: Mutex::new(Windows {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                ewma_latency_ms: 0.0,
                timeout_ratio: 0.0,
                success_ratio: 1.0,
                pending: None,
                current: Quality::Excellent,
            }),
            published: Published::new(),
        }
    }

    /// Recomputes the three EWMAs over the samples in insertion order and re-classifies,
    /// applying hysteresis before publishing a new snapshot.
    pub fn add_sample(&self, sample: NetworkQualitySample) {
        let mut w = self.windows.lock().expect("quality detector lock");

        if w.samples.len() == w.capacity {
            w.samples.pop_front();
        }
        w.samples.push_back(sample);

        let alpha = self.alpha;
        w.ewma_latency_ms = alpha * sample.latency_ms + (1.0 - alpha) * w.ewma_latency_ms;
        let timeout_indicator = if sample.was_timeout { 1.0 } else { 0.0 };
        w.timeout_ratio = alpha * timeout_indicator + (1.0 - alpha) * w.timeout_ratio;
        let success_indicator = if sample.was_success { 1.0 } else { 0.0 };
        w.success_ratio = alpha * success_indicator + (1.0 - alpha) * w.success_ratio;

        let candidate = classify(w.ewma_latency_ms, w.timeout_ratio, w.success_ratio);

        // Fast demotion: a Poor classification whose timeout ratio already meets the Fair
        // threshold is adopted immediately, skipping hysteresis.
        if candidate == Quality::Poor && w.timeout_ratio <= THRESHOLDS[2].max_timeout_ratio {
            w.current = Quality::Poor;
            w.pending = None;
        } else if candidate == w.current {
            w.pending = None;
        } else {
            let hysteresis_k = self.hysteresis_k;
            w.pending = Some(match w.pending {
                Some((pending_candidate, count)) if pending_candidate == candidate => {
                    (candidate, count + 1)
                }
                _ => (candidate, 1),
            });
            if let Some((pending_candidate, count)) = w.pending {
                if count >= hysteresis_k {
                    w.current = pending_candidate;
                    w.pending = None;
                }
            }
        }

        let sample_count = w.samples.len();
        let snapshot_quality = w.current;
        let ewma_latency_ms = w.ewma_latency_ms;
        let timeout_ratio = w.timeout_ratio;
        let success_ratio = w.success_ratio;
        drop(w);

        self.published
            .ewma_latency_ms
            .store(ewma_latency_ms.to_bits(), Ordering::Relaxed);
        self.published
            .timeout_ratio
            .store(timeout_ratio.to_bits(), Ordering::Relaxed);
        self.published
            .success_ratio
            .store(success_ratio.to_bits(), Ordering::Relaxed);
        self.published
            .sample_count
            .store(sample_count as u64, Ordering::Relaxed);
        self.published
            .quality
            .store(snapshot_quality as u8, Ordering::Relaxed);
    }

    /// Reads the most recently published snapshot without taking the internal mutex.
    pub fn snapshot(&self) -> NetworkQualitySnapshot {
        NetworkQualitySnapshot {
            quality: Quality::from_u8(self.published.quality.load(Ordering::Relaxed)),
            ewma_latency_ms: f64::from_bits(self.published.ewma_latency_ms.load(Ordering::Relaxed)),
            timeout_ratio: f64::from_bits(self.published.timeout_ratio.load(Ordering::Relaxed)),
            success_ratio: f64::from_bits(self.published.success_ratio.load(Ordering::Relaxed)),
            sample_count: self.published.sample_count.load(Ordering::Relaxed) as usize,
        }
    }
}

fn classify(latency: f64, timeout_ratio: f64, success_ratio: f64) -> Quality {
    if meets(&THRESHOLDS[0], latency, timeout_ratio, success_ratio) {
        Quality::Excellent
    } else if meets(&THRESHOLDS[1], latency, timeout_ratio, success_ratio) {
        Quality::Good
    } else if meets(&THRESHOLDS[2], latency, timeout_ratio, success_ratio) {
        Quality::Fair
    } else {
        Quality::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_sample() -> NetworkQualitySample {
        NetworkQualitySample {
            latency_ms: 50.0,
            total_ms: 60.0,
            was_timeout: false,
            was_transport_failure: false,
            bytes_transferred: 1024,
            was_success: true,
        }
    }

    fn timeout_sample() -> NetworkQualitySample {
        NetworkQualitySample {
            latency_ms: 5000.0,
            total_ms: 5000.0,
            was_timeout: true,
            was_transport_failure: false,
            bytes_transferred: 0,
            was_success: false,
        }
    }

    #[test]
    fn starts_excellent_and_stays_there_under_good_samples() {
        let detector = NetworkQualityDetector::new(64, 0.5, 3);
        for _ in 0..5 {
            detector.add_sample(good_sample());
        }
        assert_eq!(detector.snapshot().quality, Quality::Excellent);
    }

    #[test]
    fn ring_buffer_never_exceeds_its_capacity() {
        let detector = NetworkQualityDetector::new(4, 0.5, 1);
        for _ in 0..10 {
            detector.add_sample(good_sample());
        }
        assert!(detector.snapshot().sample_count <= 4);
    }

    #[test]
    fn requires_k_consecutive_windows_before_demoting() {
        let detector = NetworkQualityDetector::new(64, 0.9, 3);
        for _ in 0..5 {
            detector.add_sample(good_sample());
        }
        assert_eq!(detector.snapshot().quality, Quality::Excellent);

        // One bad sample alone should not flip the published quality yet.
        detector.add_sample(timeout_sample());
        assert_eq!(detector.snapshot().quality, Quality::Excellent);
    }

    #[test]
    fn fast_demotes_to_poor_when_timeout_ratio_already_meets_fair_bound() {
        // Transport failures (not timeouts) drag success_ratio into Poor territory while
        // timeout_ratio stays at 0, which already meets the Fair bound - this should adopt Poor
        // on the very first bad window rather than waiting for K consecutive ones.
        let detector = NetworkQualityDetector::new(64, 0.9, 3);
        for _ in 0..5 {
            detector.add_sample(good_sample());
        }
        assert_eq!(detector.snapshot().quality, Quality::Excellent);

        detector.add_sample(NetworkQualitySample {
            latency_ms: 50.0,
            total_ms: 50.0,
            was_timeout: false,
            was_transport_failure: true,
            bytes_transferred: 0,
            was_success: false,
        });
        assert_eq!(detector.snapshot().quality, Quality::Poor);
    }
}
