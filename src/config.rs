//! Engine configuration, loaded from environment variables.
//!
//! DESIGN
//! ======
//! Every timing window and tolerance the engine relies on is a named field
//! here rather than an inline literal, so tests can shrink or stretch them
//! and deployments can tune them without a rebuild. Unset or unparsable
//! variables fall back to the defaults in [`crate::consts`].

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

use crate::annotation::{Position, Sanitizer};
use crate::consts::{
    DEFAULT_BUS_CAPACITY, DEFAULT_COORD_EPSILON_DEG, DEFAULT_DRAG_GRACE_MS, DEFAULT_FALLBACK_LATITUDE,
    DEFAULT_FALLBACK_LONGITUDE, DEFAULT_MIN_SPACING_MS, DEFAULT_QUIET_WINDOW_MS, DEFAULT_RADIUS_KM, DEFAULT_SUBJECT,
};

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Logical subject being edited; only used to label logs.
    pub subject: String,
    /// Quiet window before a passive edit is flushed to persistence.
    pub quiet_window: Duration,
    /// Minimum spacing between two outbound persistence calls.
    pub min_spacing: Duration,
    /// How long a committed drag keeps guarding its index.
    pub drag_grace: Duration,
    /// Coordinate tolerance in degrees for override confirmation.
    pub epsilon_deg: f64,
    /// Radius substituted for missing or non-positive radii, in kilometers.
    pub default_radius_km: f64,
    /// Coordinate substituted for out-of-range positions.
    pub fallback: Position,
    /// Capacity of the sibling broadcast bus.
    pub bus_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_owned(),
            quiet_window: Duration::from_millis(DEFAULT_QUIET_WINDOW_MS),
            min_spacing: Duration::from_millis(DEFAULT_MIN_SPACING_MS),
            drag_grace: Duration::from_millis(DEFAULT_DRAG_GRACE_MS),
            epsilon_deg: DEFAULT_COORD_EPSILON_DEG,
            default_radius_km: DEFAULT_RADIUS_KM,
            fallback: Position::new(DEFAULT_FALLBACK_LONGITUDE, DEFAULT_FALLBACK_LATITUDE),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Load configuration from `GEOSYNC_*` environment variables.
    ///
    /// An out-of-range fallback coordinate is ignored in favor of the default,
    /// since the fallback itself must always be storable.
    #[must_use]
    pub fn from_env() -> Self {
        let subject = std::env::var("GEOSYNC_SUBJECT").unwrap_or_else(|_| DEFAULT_SUBJECT.to_owned());
        let mut fallback = Position::new(
            env_parse("GEOSYNC_FALLBACK_LON", DEFAULT_FALLBACK_LONGITUDE),
            env_parse("GEOSYNC_FALLBACK_LAT", DEFAULT_FALLBACK_LATITUDE),
        );
        if !fallback.is_valid() {
            tracing::warn!(
                longitude = fallback.longitude,
                latitude = fallback.latitude,
                "configured fallback coordinate out of range; using default"
            );
            fallback = Position::new(DEFAULT_FALLBACK_LONGITUDE, DEFAULT_FALLBACK_LATITUDE);
        }

        let mut default_radius_km = env_parse("GEOSYNC_DEFAULT_RADIUS_KM", DEFAULT_RADIUS_KM);
        if !(default_radius_km.is_finite() && default_radius_km > 0.0) {
            default_radius_km = DEFAULT_RADIUS_KM;
        }

        Self {
            subject,
            quiet_window: Duration::from_millis(env_parse("GEOSYNC_QUIET_WINDOW_MS", DEFAULT_QUIET_WINDOW_MS)),
            min_spacing: Duration::from_millis(env_parse("GEOSYNC_MIN_SPACING_MS", DEFAULT_MIN_SPACING_MS)),
            drag_grace: Duration::from_millis(env_parse("GEOSYNC_DRAG_GRACE_MS", DEFAULT_DRAG_GRACE_MS)),
            epsilon_deg: env_parse("GEOSYNC_EPSILON_DEG", DEFAULT_COORD_EPSILON_DEG),
            default_radius_km,
            fallback,
            bus_capacity: env_parse("GEOSYNC_BUS_CAPACITY", DEFAULT_BUS_CAPACITY).max(1),
        }
    }

    /// The coordinate sanitizer implied by this configuration.
    #[must_use]
    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer { fallback: self.fallback, default_radius_km: self.default_radius_km }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
