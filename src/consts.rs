//! Shared numeric constants for the sync engine.

// ── Geometry ────────────────────────────────────────────────────

/// Smallest valid longitude in degrees.
pub const MIN_LONGITUDE: f64 = -180.0;

/// Largest valid longitude in degrees.
pub const MAX_LONGITUDE: f64 = 180.0;

/// Smallest valid latitude in degrees.
pub const MIN_LATITUDE: f64 = -90.0;

/// Largest valid latitude in degrees.
pub const MAX_LATITUDE: f64 = 90.0;

/// Radius in kilometers used when a record carries none or a non-positive one.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// Longitude substituted for out-of-range coordinates (Hanoi city center).
pub const DEFAULT_FALLBACK_LONGITUDE: f64 = 105.8342;

/// Latitude substituted for out-of-range coordinates (Hanoi city center).
pub const DEFAULT_FALLBACK_LATITUDE: f64 = 21.0278;

/// Two positions closer than this on both axes are the same point (sub-meter).
pub const DEFAULT_COORD_EPSILON_DEG: f64 = 1e-6;

// ── Timing ──────────────────────────────────────────────────────

/// Quiet window after the last passive edit before a persistence call fires.
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 1500;

/// Minimum spacing between two persistence calls for the same subject.
pub const DEFAULT_MIN_SPACING_MS: u64 = 2000;

/// How long a committed drag keeps guarding its index before returning to idle.
pub const DEFAULT_DRAG_GRACE_MS: u64 = 150;

// ── Plumbing ────────────────────────────────────────────────────

/// Capacity of the sibling broadcast bus.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Logical subject name used in persistence logs when none is configured.
pub const DEFAULT_SUBJECT: &str = "location-question";
