//! Process-level, initialized-once configuration passed into the connection at construction,
//! replacing the source's global mutable singletons (§9) with plain structs and `Default` impls
//! carrying every tunable named in the specification.

use crate::types::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use std::time::Duration;

/// Local SETTINGS values to advertise, plus the HPACK bomb guard and flow-control replenishment
/// threshold fraction (§3's `ConnectionConfig`).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub header_table_size: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    /// HPACK decompression-bomb guard: the maximum total decoded header bytes (name + value +
    /// 32 per header) a single connection will accept across its lifetime of header blocks.
    pub max_decoded_header_bytes: usize,
    /// Fraction of a window's nominal size below which a WINDOW_UPDATE is queued to replenish
    /// it back to the nominal value (§4.6 default: one half).
    pub replenish_threshold_fraction: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 65_536,
            max_decoded_header_bytes: 16 * 1024 * 1024,
            replenish_threshold_fraction: 0.5,
        }
    }
}

/// Tunables for the network-quality detector and adaptive-timeout middleware (§4.8, §4.9).
#[derive(Debug, Clone)]
pub struct AdaptiveTimeoutConfig {
    pub enabled: bool,
    pub base_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// Ring-buffer capacity for retained samples (§4.8 default: 64).
    pub sample_capacity: usize,
    /// EWMA coefficient alpha (§4.8 default: 0.5).
    pub ewma_alpha: f64,
    /// Consecutive worse/better windows required before a classification change takes effect
    /// (§4.8 default: 3), except for the fast-demotion exception.
    pub hysteresis_k: u32,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_timeout: Duration::from_secs(10),
            min_timeout: Duration::from_secs(2),
            max_timeout: Duration::from_secs(60),
            sample_capacity: 64,
            ewma_alpha: 0.5,
            hysteresis_k: 3,
        }
    }
}

/// Tunables for the per-host concurrency limiter and priority queue (§4.10).
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub per_host_limit: usize,
    pub global_limit: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            per_host_limit: 6,
            global_limit: 64,
        }
    }
}

/// Size-class bucket layout and per-bucket capacity for the read/write buffer object pool
/// (§4.11).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `(bucket_size, capacity)` pairs, smallest bucket first.
    pub buckets: Vec<(usize, usize)>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buckets: vec![(4 * 1024, 32), (16 * 1024, 16), (64 * 1024, 8)],
        }
    }
}

/// Top-level, process-level configuration passed into a connection at construction (§3).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub adaptive_timeout: AdaptiveTimeoutConfig,
    pub admission: AdmissionConfig,
    pub pool: PoolConfig,
}
