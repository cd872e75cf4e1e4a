//! Adaptive-timeout scaling observed purely through the public `timeout`/`quality` modules: a
//! detector driven to `Poor` should scale a request's deadline up, clamped to the configured
//! bounds, unless the request opts out via an explicit timeout.

use http2::config::AdaptiveTimeoutConfig;
use http2::quality::{NetworkQualityDetector, NetworkQualitySample};
use http2::timeout::AdaptiveTimeout;
use std::sync::Arc;
use std::time::Duration;

fn poor_detector() -> Arc<NetworkQualityDetector> {
    let detector = Arc::new(NetworkQualityDetector::new(64, 0.5, 3));
    for _ in 0..5 {
        detector.add_sample(NetworkQualitySample {
            latency_ms: 4000.0,
            total_ms: 4000.0,
            was_timeout: false,
            was_transport_failure: true,
            bytes_transferred: 0,
            was_success: false,
        });
    }
    detector
}

#[tokio::test]
async fn poor_network_quality_scales_the_deadline_up() {
    let detector = poor_detector();
    let adaptive = AdaptiveTimeout::new(AdaptiveTimeoutConfig::default(), detector);
    let adapted = adaptive.adapt(Duration::from_secs(10), false);
    assert_eq!(adapted, Duration::from_secs(20)); // Poor -> 2.0x
}

#[tokio::test]
async fn explicit_timeout_metadata_bypasses_adaptive_scaling() {
    let detector = poor_detector();
    let adaptive = AdaptiveTimeout::new(AdaptiveTimeoutConfig::default(), detector);
    let requested = Duration::from_secs(7);
    assert_eq!(adaptive.adapt(requested, true), requested);
}

#[tokio::test]
async fn outcome_feedback_is_reflected_in_the_next_snapshot() {
    let detector = Arc::new(NetworkQualityDetector::new(64, 0.5, 3));
    let adaptive = AdaptiveTimeout::new(AdaptiveTimeoutConfig::default(), detector.clone());

    assert_eq!(detector.snapshot().quality, http2::quality::Quality::Excellent);
    adaptive.record_outcome(Duration::from_millis(3000), 0, false, true, false);
    adaptive.record_outcome(Duration::from_millis(3000), 0, false, true, false);
    adaptive.record_outcome(Duration::from_millis(3000), 0, false, true, false);

    assert!(detector.snapshot().quality > http2::quality::Quality::Excellent);
}
