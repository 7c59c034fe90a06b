//! Tuning constants.
//!
//! These are the defaults behind [`SamplerConfig`](crate::SamplerConfig) and
//! [`PlaybackConfig`](crate::PlaybackConfig). Hosts override them through
//! [`NarratorConfig`](crate::NarratorConfig) rather than editing them here.

/// Mean Earth radius used by all great-circle math (meters).
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Fewest sample points generated for any route.
pub const MIN_SAMPLES: usize = 4;
/// Most sample points generated for any route.
pub const MAX_SAMPLES: usize = 13;
/// Samples per kilometer of straight-line distance before clamping.
pub const SAMPLE_DENSITY_PER_KM: f64 = 2.5;

/// Smallest proximity radius (meters).
pub const MIN_RADIUS_METERS: f64 = 120.0;
/// Largest proximity radius (meters).
pub const MAX_RADIUS_METERS: f64 = 1000.0;
/// Route distance is divided by this to get the proximity radius.
pub const RADIUS_DIVISOR: f64 = 9.0;

/// Playback duration per meter of route (ms/m).
pub const PLAYBACK_SPEED_FACTOR: f64 = 0.5;
pub const PLAYBACK_MIN_DURATION_MS: u64 = 8_000;
pub const PLAYBACK_MAX_DURATION_MS: u64 = 60_000;
pub const PLAYBACK_TICK_INTERVAL_MS: u64 = 100;

/// Minimum gap between two fired commentary events.
pub const TRIGGER_COOLDOWN_MS: u64 = 3_000;

/// Scheduled fallback slots: one per this many kilometers, clamped below.
pub const SCHEDULED_KM_PER_SLOT: f64 = 10.0;
pub const MIN_SCHEDULED_SLOTS: usize = 3;
pub const MAX_SCHEDULED_SLOTS: usize = 6;

/// Routes shorter than this get the "short hop" summary.
pub const SHORT_ROUTE_METERS: f64 = 1_000.0;

/// Server-side timeout requested in generated Overpass queries (seconds).
pub const QUERY_TIMEOUT_SECS: u32 = 25;
