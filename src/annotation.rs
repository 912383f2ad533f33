//! Annotation model: geo positions, point-plus-radius annotations, and sanitization.
//!
//! An [`Annotation`] is what the store holds; an [`AnnotationRecord`] is the
//! plain structured record exchanged with the outside world
//! (`{ longitude, latitude, radius, id? }`). Conversion goes through a
//! [`Sanitizer`], which never rejects a record: out-of-range coordinates are
//! replaced by the configured fallback and bad radii by the default, so one
//! bad point cannot block an otherwise valid batch.

#[cfg(test)]
#[path = "annotation_test.rs"]
mod annotation_test;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::consts::{MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE};

/// Server-assigned annotation identity.
pub type AnnotationId = Uuid;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
}

impl Position {
    #[must_use]
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Whether both axes are finite and inside their valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&self.longitude)
            && (MIN_LATITUDE..=MAX_LATITUDE).contains(&self.latitude)
    }

    /// Whether both axes differ by at most `epsilon` degrees.
    #[must_use]
    pub fn approx_eq(&self, other: &Position, epsilon: f64) -> bool {
        (self.longitude - other.longitude).abs() <= epsilon && (self.latitude - other.latitude).abs() <= epsilon
    }
}

/// One point-plus-radius annotation in the ordered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Position in the ordered set. Dense and renumbered after every structural change.
    pub index: usize,
    /// Absent until the server has persisted the annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AnnotationId>,
    pub longitude: f64,
    pub latitude: f64,
    /// Radius in kilometers; always positive once stored.
    pub radius: f64,
}

impl Annotation {
    #[must_use]
    pub fn new(longitude: f64, latitude: f64, radius: f64) -> Self {
        Self { index: 0, id: None, longitude, latitude, radius }
    }

    #[must_use]
    pub fn with_id(mut self, id: AnnotationId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.longitude, self.latitude)
    }

    pub fn set_position(&mut self, position: Position) {
        self.longitude = position.longitude;
        self.latitude = position.latitude;
    }

    /// Wire form of this annotation.
    #[must_use]
    pub fn to_record(&self) -> AnnotationRecord {
        AnnotationRecord {
            id: self.id,
            longitude: self.longitude,
            latitude: self.latitude,
            radius: Some(self.radius),
        }
    }
}

/// Wire record exchanged with the hosting editor, siblings, and the server.
///
/// Longitude and latitude are required; a record missing either is
/// structurally malformed. Radius may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AnnotationId>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl AnnotationRecord {
    #[must_use]
    pub fn new(longitude: f64, latitude: f64, radius: Option<f64>) -> Self {
        Self { id: None, longitude, latitude, radius }
    }
}

/// Substitutes storable values for invalid coordinates and radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sanitizer {
    pub fallback: Position,
    pub default_radius_km: f64,
}

impl Sanitizer {
    /// Convert a wire record into an annotation at `index`.
    #[must_use]
    pub fn annotation(&self, index: usize, record: &AnnotationRecord) -> Annotation {
        let mut annotation = Annotation {
            index,
            id: record.id,
            longitude: record.longitude,
            latitude: record.latitude,
            radius: record.radius.unwrap_or(self.default_radius_km),
        };
        self.repair(&mut annotation);
        annotation
    }

    /// Convert a batch of wire records, numbering them densely from zero.
    #[must_use]
    pub fn annotations(&self, records: &[AnnotationRecord]) -> Vec<Annotation> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| self.annotation(index, record))
            .collect()
    }

    /// Repair an annotation in place. Returns `true` if anything was substituted.
    pub fn repair(&self, annotation: &mut Annotation) -> bool {
        let mut repaired = false;
        if !annotation.position().is_valid() {
            warn!(
                index = annotation.index,
                longitude = annotation.longitude,
                latitude = annotation.latitude,
                "invalid coordinate replaced with fallback"
            );
            annotation.set_position(self.fallback);
            repaired = true;
        }
        if !(annotation.radius.is_finite() && annotation.radius > 0.0) {
            warn!(index = annotation.index, radius = annotation.radius, "invalid radius replaced with default");
            annotation.radius = self.default_radius_km;
            repaired = true;
        }
        repaired
    }
}

/// Renumber `index` fields so they match positions in the slice.
pub fn renumber(annotations: &mut [Annotation]) {
    for (index, annotation) in annotations.iter_mut().enumerate() {
        annotation.index = index;
    }
}
