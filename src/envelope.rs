//! The update envelope: one uniform shape for every proposed change.
//!
//! Whatever the origin (a prop update from the host editor, a sibling
//! broadcast, a drag completion, a persistence outcome), a change reaches the
//! resolver as an [`UpdateEnvelope`] carrying the [`Change`] itself, a
//! producer-assigned [`Timestamp`], and a typed [`Source`].

#[cfg(test)]
#[path = "envelope_test.rs"]
mod envelope_test;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::{Annotation, Position, renumber};
use crate::clock::Timestamp;
use crate::drag::SessionId;

/// The six kinds of change an envelope can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Replace,
    PointUpdate,
    RadiusUpdate,
    Insert,
    Remove,
    Revert,
}

/// Which part of the set an envelope's timestamp is ordered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The whole ordered set (replace, insert, remove, revert).
    Whole,
    /// A single annotation, by index.
    Index(usize),
}

impl Scope {
    /// Whether a change in this scope can affect the annotation at `index`.
    #[must_use]
    pub fn touches(self, index: usize) -> bool {
        match self {
            Self::Whole => true,
            Self::Index(i) => i == index,
        }
    }
}

/// Producer of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// A local edit from this editor's own chrome (tag `"self"`).
    Local,
    /// Completion of a drag session in this editor.
    DragEnd(SessionId),
    /// Authoritative state pushed by the host or another tab.
    ExternalSync,
    /// Confirmation of a persistence call issued by this editor.
    ServerSuccess,
    /// Rollback after a failed persistence call.
    ServerErrorRevert,
    /// A sibling component, identified by its free-form tag.
    Peer(String),
}

impl Source {
    /// Parse a free-form source tag. Tags are matched exactly.
    ///
    /// `"drag-end"` cannot be claimed from outside: a drag completion is only
    /// ever produced by the drag session itself, so the tag becomes a peer tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "self" => Self::Local,
            "external-sync" => Self::ExternalSync,
            "server-success" => Self::ServerSuccess,
            "server-error-revert" => Self::ServerErrorRevert,
            other => Self::Peer(other.to_owned()),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Local => "self",
            Self::DragEnd(_) => "drag-end",
            Self::ExternalSync => "external-sync",
            Self::ServerSuccess => "server-success",
            Self::ServerErrorRevert => "server-error-revert",
            Self::Peer(tag) => tag,
        }
    }

    /// Self-originated edits win timestamp ties.
    #[must_use]
    pub fn is_self(&self) -> bool {
        matches!(self, Self::Local | Self::DragEnd(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The proposed change itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Replace the whole set.
    Replace(Vec<Annotation>),
    /// Move one annotation.
    PointUpdate { index: usize, position: Position },
    /// Resize one annotation.
    RadiusUpdate { index: usize, radius: f64 },
    /// Insert an annotation at `index` (may equal the current length to append).
    Insert { index: usize, annotation: Annotation },
    /// Remove the annotation at `index`.
    Remove { index: usize },
    /// Restore a known-good snapshot, bypassing timestamp ordering.
    Revert(Vec<Annotation>),
}

impl Change {
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Replace(_) => EnvelopeKind::Replace,
            Self::PointUpdate { .. } => EnvelopeKind::PointUpdate,
            Self::RadiusUpdate { .. } => EnvelopeKind::RadiusUpdate,
            Self::Insert { .. } => EnvelopeKind::Insert,
            Self::Remove { .. } => EnvelopeKind::Remove,
            Self::Revert(_) => EnvelopeKind::Revert,
        }
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            Self::PointUpdate { index, .. } | Self::RadiusUpdate { index, .. } => Scope::Index(*index),
            Self::Replace(_) | Self::Insert { .. } | Self::Remove { .. } | Self::Revert(_) => Scope::Whole,
        }
    }

    /// Whether the change alters the number of annotations (or can, for whole-set payloads).
    #[must_use]
    pub fn is_structural(&self, current_len: usize) -> bool {
        match self {
            Self::Insert { .. } | Self::Remove { .. } => true,
            Self::Replace(set) | Self::Revert(set) => set.len() != current_len,
            Self::PointUpdate { .. } | Self::RadiusUpdate { .. } => false,
        }
    }

    /// The full set this change would produce from `current`, with dense indices.
    ///
    /// Returns `None` if the change addresses an index that does not exist.
    #[must_use]
    pub fn apply_to(&self, current: &[Annotation]) -> Option<Vec<Annotation>> {
        let mut next = match self {
            Self::Replace(set) | Self::Revert(set) => set.clone(),
            Self::PointUpdate { index, position } => {
                let mut next = current.to_vec();
                next.get_mut(*index)?.set_position(*position);
                next
            }
            Self::RadiusUpdate { index, radius } => {
                let mut next = current.to_vec();
                next.get_mut(*index)?.radius = *radius;
                next
            }
            Self::Insert { index, annotation } => {
                if *index > current.len() {
                    return None;
                }
                let mut next = current.to_vec();
                next.insert(*index, annotation.clone());
                next
            }
            Self::Remove { index } => {
                if *index >= current.len() {
                    return None;
                }
                let mut next = current.to_vec();
                next.remove(*index);
                next
            }
        };
        renumber(&mut next);
        Some(next)
    }
}

/// A normalized, timestamped, attributed change.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    /// Unique id; correlates logs and identifies replays.
    pub id: Uuid,
    pub change: Change,
    pub timestamp: Timestamp,
    pub source: Source,
}

impl UpdateEnvelope {
    #[must_use]
    pub fn new(change: Change, timestamp: Timestamp, source: Source) -> Self {
        Self { id: Uuid::new_v4(), change, timestamp, source }
    }

    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        self.change.kind()
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.change.scope()
    }
}
