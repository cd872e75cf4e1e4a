//! The adaptive timeout middleware (§4.9): scales a request's deadline from the network-quality
//! detector's current classification, then feeds an observed outcome back into the detector.

use crate::config::AdaptiveTimeoutConfig;
use crate::quality::{NetworkQualityDetector, NetworkQualitySample, Quality};
use std::sync::Arc;
use std::time::Duration;

fn multiplier(quality: Quality) -> f64 {
    match quality {
        Quality::Excellent => 0.8,
        Quality::Good => 1.0,
        Quality::Fair => 1.5,
        Quality::Poor => 2.0,
    }
}

/// Adapts per-request deadlines from a shared [`NetworkQualityDetector`] snapshot and reports
/// outcomes back to it once a request completes.
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    detector: Arc<NetworkQualityDetector>,
}

impl AdaptiveTimeout {
    pub fn new(config: AdaptiveTimeoutConfig, detector: Arc<NetworkQualityDetector>) -> Self {
        Self { config, detector }
    }

    pub fn detector(&self) -> &Arc<NetworkQualityDetector> {
        &self.detector
    }

    /// Computes the deadline for a request. If the request carries an explicit timeout
    /// (`explicit_timeout == true`, per the reserved metadata key in §6) or adaptive mode is
    /// disabled, the caller-supplied timeout passes through unscaled.
    pub fn adapt(&self, requested: Duration, explicit_timeout: bool) -> Duration {
        if explicit_timeout || !self.config.enabled {
            return requested;
        }
        let quality = self.detector.snapshot().quality;
        let scaled = requested.mul_f64(multiplier(quality));
        scaled.clamp(self.config.min_timeout, self.config.max_timeout)
    }

    /// Synthesizes a sample from an observed outcome and feeds it back into the detector. Called
    /// after the pipeline completes, whatever the outcome (success, timeout, transport failure,
    /// or cancellation).
    pub fn record_outcome(
        &self,
        elapsed: Duration,
        bytes_transferred: u64,
        was_timeout: bool,
        was_transport_failure: bool,
        was_success: bool,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.detector.add_sample(NetworkQualitySample {
            latency_ms: elapsed_ms,
            total_ms: elapsed_ms,
            was_timeout,
            was_transport_failure,
            bytes_transferred,
            was_success,
        });
    }
}
