//! Update envelope gateway: the single chokepoint for every update source.
//!
//! DESIGN
//! ======
//! Host prop updates, sibling bus messages, drag completions, local chrome
//! edits, and persistence outcomes all arrive here as a [`RawUpdate`] and
//! leave as one [`UpdateEnvelope`] shape. The gateway only normalizes: it
//! parses, sanitizes coordinates, assigns timestamps and sources, and never
//! decides acceptance.
//!
//! ERROR HANDLING
//! ==============
//! A structurally malformed update (a payload that is not a list, a record
//! without longitude or latitude) is dropped whole with a `warn!` and yields
//! `None`. Out-of-range values are not malformation: the sanitizer repairs
//! them and the update goes through.

#[cfg(test)]
#[path = "gateway_test.rs"]
mod gateway_test;

use tracing::warn;

use crate::annotation::{Annotation, AnnotationRecord, Position, Sanitizer, renumber};
use crate::bus::BusMessage;
use crate::clock::Timestamp;
use crate::drag::DragCompletion;
use crate::envelope::{Change, Source, UpdateEnvelope};

/// An update as received from one of the sources, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawUpdate {
    /// The hosting editor replaced the whole set (prop update).
    External { annotations: serde_json::Value, timestamp: Timestamp, source: String },
    /// A sibling component's bus message.
    Bus(BusMessage),
    /// A drag gesture committed in this editor.
    DragEnd(DragCompletion),
    /// An edit from this editor's own chrome.
    Local(Change),
    /// The persistence collaborator confirmed a call dispatched at `dispatched_at`.
    PersistenceSucceeded { annotations: Vec<Annotation>, dispatched_at: Timestamp },
    /// A persistence call failed; roll back to `snapshot`.
    PersistenceFailed { snapshot: Vec<Annotation> },
}

impl RawUpdate {
    fn label(&self) -> &'static str {
        match self {
            Self::External { .. } => "external",
            Self::Bus(_) => "bus",
            Self::DragEnd(_) => "drag-end",
            Self::Local(_) => "local",
            Self::PersistenceSucceeded { .. } => "persistence-succeeded",
            Self::PersistenceFailed { .. } => "persistence-failed",
        }
    }
}

/// Normalizes raw updates into envelopes.
#[derive(Debug, Clone, Copy)]
pub struct Gateway {
    sanitizer: Sanitizer,
}

impl Gateway {
    #[must_use]
    pub fn new(sanitizer: Sanitizer) -> Self {
        Self { sanitizer }
    }

    /// Normalize `raw` into an envelope, or `None` if it is malformed.
    ///
    /// `stamp` is this engine's own clock reading. It timestamps every update
    /// produced here (drag ends, local edits) and any foreign update that
    /// arrives without a timestamp of its own.
    #[must_use]
    pub fn normalize(&self, raw: RawUpdate, stamp: Timestamp) -> Option<UpdateEnvelope> {
        let label = raw.label();
        let envelope = match raw {
            RawUpdate::External { annotations, timestamp, source } => {
                let set = self.parse_set(&annotations, label)?;
                UpdateEnvelope::new(Change::Replace(set), timestamp, Source::from_tag(&source))
            }
            RawUpdate::Bus(message) => self.normalize_bus(message, stamp)?,
            RawUpdate::DragEnd(completion) => UpdateEnvelope::new(
                Change::PointUpdate {
                    index: completion.index,
                    position: self.sanitize_position(completion.index, completion.position),
                },
                stamp,
                Source::DragEnd(completion.session),
            ),
            RawUpdate::Local(change) => UpdateEnvelope::new(self.sanitize_change(change), stamp, Source::Local),
            RawUpdate::PersistenceSucceeded { annotations, dispatched_at } => {
                let change = Change::Replace(self.sanitize_set(annotations));
                UpdateEnvelope::new(change, dispatched_at, Source::ServerSuccess)
            }
            RawUpdate::PersistenceFailed { snapshot } => {
                UpdateEnvelope::new(Change::Revert(self.sanitize_set(snapshot)), stamp, Source::ServerErrorRevert)
            }
        };
        Some(envelope)
    }

    fn normalize_bus(&self, message: BusMessage, stamp: Timestamp) -> Option<UpdateEnvelope> {
        match message {
            BusMessage::AnnotationsReplaced { annotations, timestamp, source } => {
                let set = self.parse_set(&annotations, "bus")?;
                // A sibling is never this editor, whatever tag it sends.
                let source = match Source::from_tag(&source) {
                    Source::Local => Source::Peer(source),
                    other => other,
                };
                Some(UpdateEnvelope::new(Change::Replace(set), timestamp.unwrap_or(stamp), source))
            }
            BusMessage::ForceSync { annotations } => {
                let set = self.parse_set(&annotations, "bus")?;
                Some(UpdateEnvelope::new(Change::Replace(set), stamp, Source::ExternalSync))
            }
            BusMessage::RadiusChanged { index, radius, timestamp } => Some(UpdateEnvelope::new(
                Change::RadiusUpdate { index, radius: self.sanitize_radius(radius) },
                timestamp.unwrap_or(stamp),
                Source::ExternalSync,
            )),
        }
    }

    fn parse_set(&self, value: &serde_json::Value, label: &str) -> Option<Vec<Annotation>> {
        match serde_json::from_value::<Vec<AnnotationRecord>>(value.clone()) {
            Ok(records) => Some(self.sanitizer.annotations(&records)),
            Err(e) => {
                warn!(source = label, error = %e, "malformed annotation payload dropped");
                None
            }
        }
    }

    fn sanitize_set(&self, mut set: Vec<Annotation>) -> Vec<Annotation> {
        renumber(&mut set);
        for annotation in &mut set {
            self.sanitizer.repair(annotation);
        }
        set
    }

    fn sanitize_change(&self, change: Change) -> Change {
        match change {
            Change::Replace(set) => Change::Replace(self.sanitize_set(set)),
            Change::Revert(set) => Change::Revert(self.sanitize_set(set)),
            Change::PointUpdate { index, position } => {
                Change::PointUpdate { index, position: self.sanitize_position(index, position) }
            }
            Change::RadiusUpdate { index, radius } => {
                Change::RadiusUpdate { index, radius: self.sanitize_radius(radius) }
            }
            Change::Insert { index, mut annotation } => {
                annotation.index = index;
                self.sanitizer.repair(&mut annotation);
                Change::Insert { index, annotation }
            }
            Change::Remove { index } => Change::Remove { index },
        }
    }

    fn sanitize_position(&self, index: usize, position: Position) -> Position {
        if position.is_valid() {
            return position;
        }
        warn!(
            index,
            longitude = position.longitude,
            latitude = position.latitude,
            "invalid coordinate replaced with fallback"
        );
        self.sanitizer.fallback
    }

    fn sanitize_radius(&self, radius: f64) -> f64 {
        if radius.is_finite() && radius > 0.0 {
            radius
        } else {
            warn!(radius, "invalid radius replaced with default");
            self.sanitizer.default_radius_km
        }
    }
}
