use std::num::NonZeroU32;

// Safety: value is a const, that can't be zero
pub const U31_MAX: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(u32::MAX >> 1) };

/// Default value for every flow-control window and SETTINGS_INITIAL_WINDOW_SIZE, per RFC 7540
/// §6.9.2.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default SETTINGS_MAX_FRAME_SIZE, per RFC 7540 §6.5.2.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Default HPACK dynamic table capacity, per RFC 7541 §4.2.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

pub type StreamId = u32;
pub type NonZeroStreamId = std::num::NonZeroU32;

/// An ordered, multi-value header list: a flat vec of (name, value) pairs rather than a map, so
/// that repeated header names (e.g. multiple `set-cookie`) survive intact.
pub type Headers = Vec<(String, String)>;
