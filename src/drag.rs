//! Drag session manager: the state machine for one manual move gesture.
//!
//! `Idle → Dragging → (Committing | Aborted) → Idle`
//!
//! While a session is `Dragging` every pointer sample goes straight into the
//! store's override table, so the marker tracks the pointer without ever
//! passing through the resolver. On commit the session stays alive in
//! `Committing` for a short grace period: long enough for the resulting
//! persistence call to start before any other envelope may touch that index.
//! The resolver consults [`DragSessionManager::guard`] to reject everything
//! else aimed at the dragged annotation until then.

#[cfg(test)]
#[path = "drag_test.rs"]
mod drag_test;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::annotation::Position;
use crate::error::DragError;
use crate::store::AnnotationStore;

/// Unique identifier for one drag gesture.
pub type SessionId = Uuid;

/// One drag gesture on one annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub id: SessionId,
    /// Index of the annotation being moved.
    pub annotation_index: usize,
    pub started_at: Instant,
    /// Most recent pointer position sampled during the gesture.
    pub last_position: Position,
    /// Override that was pending for this index before the gesture began; restored on abort.
    prior_override: Option<Position>,
}

/// Lifecycle phase of the drag state machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DragPhase {
    /// No gesture in progress.
    #[default]
    Idle,
    /// Pointer is down and moving the annotation.
    Dragging(DragSession),
    /// Gesture ended; still guarding the index until `settle_at`.
    Committing { session: DragSession, settle_at: Instant },
}

/// What the resolver needs to know about an active session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGuard {
    pub session: SessionId,
    pub index: usize,
    /// Where the marker sits under the pointer.
    pub position: Position,
    /// The gesture has ended and is in its grace period.
    pub committing: bool,
}

impl DragGuard {
    fn of(session: &DragSession, committing: bool) -> Self {
        Self { session: session.id, index: session.annotation_index, position: session.last_position, committing }
    }
}

/// The final position of a committed gesture, to be turned into an envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragCompletion {
    pub session: SessionId,
    pub index: usize,
    pub position: Position,
}

/// Owns the single drag session.
#[derive(Debug)]
pub struct DragSessionManager {
    phase: DragPhase,
    grace: Duration,
}

impl DragSessionManager {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self { phase: DragPhase::Idle, grace }
    }

    #[must_use]
    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    /// The live session, if one is dragging or committing.
    #[must_use]
    pub fn session(&self) -> Option<&DragSession> {
        match &self.phase {
            DragPhase::Idle => None,
            DragPhase::Dragging(session) | DragPhase::Committing { session, .. } => Some(session),
        }
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, DragPhase::Dragging(_))
    }

    /// Guard for the resolver while a session is dragging or committing.
    #[must_use]
    pub fn guard(&self) -> Option<DragGuard> {
        match &self.phase {
            DragPhase::Idle => None,
            DragPhase::Dragging(session) => Some(DragGuard::of(session, false)),
            DragPhase::Committing { session, .. } => Some(DragGuard::of(session, true)),
        }
    }

    /// When the committing session returns to idle, if one is committing.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            DragPhase::Committing { settle_at, .. } => Some(*settle_at),
            _ => None,
        }
    }

    // --- Transitions ---

    /// Start dragging the annotation at `index`.
    ///
    /// A session still in its commit grace period is settled early. A session
    /// that is actively dragging is left untouched and the call fails.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::AlreadyDragging`] if a gesture is in progress and
    /// [`DragError::IndexOutOfRange`] if `index` does not exist in the store.
    pub fn begin(&mut self, index: usize, store: &AnnotationStore, now: Instant) -> Result<SessionId, DragError> {
        if let DragPhase::Dragging(session) = &self.phase {
            warn!(session = %session.id, index, "drag begin rejected: session already dragging");
            return Err(DragError::AlreadyDragging(session.id));
        }
        let Some(annotation) = store.get().into_iter().nth(index) else {
            return Err(DragError::IndexOutOfRange { index, len: store.len() });
        };
        if let DragPhase::Committing { session, .. } = &self.phase {
            debug!(session = %session.id, "settling committing drag early for new gesture");
        }

        let session = DragSession {
            id: Uuid::new_v4(),
            annotation_index: index,
            started_at: now,
            last_position: annotation.position(),
            prior_override: store.override_at(index),
        };
        let id = session.id;
        debug!(session = %id, index, "drag begin");
        self.phase = DragPhase::Dragging(session);
        Ok(id)
    }

    /// Sample the pointer; the marker follows via the store's override table.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::NotDragging`] outside `Dragging` and
    /// [`DragError::WrongIndex`] if `index` is not the dragged annotation.
    pub fn move_to(&mut self, index: usize, position: Position, store: &mut AnnotationStore) -> Result<(), DragError> {
        let DragPhase::Dragging(session) = &mut self.phase else {
            return Err(DragError::NotDragging);
        };
        if session.annotation_index != index {
            return Err(DragError::WrongIndex { expected: session.annotation_index, got: index });
        }
        session.last_position = position;
        store.set_override(index, position);
        Ok(())
    }

    /// End the gesture at its last sampled position and start the grace period.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::NotDragging`] outside `Dragging`.
    pub fn commit(&mut self, now: Instant) -> Result<DragCompletion, DragError> {
        if !self.is_dragging() {
            return Err(DragError::NotDragging);
        }
        let DragPhase::Dragging(session) = std::mem::take(&mut self.phase) else {
            return Err(DragError::NotDragging);
        };
        let completion = DragCompletion {
            session: session.id,
            index: session.annotation_index,
            position: session.last_position,
        };
        debug!(session = %session.id, index = session.annotation_index, "drag commit");
        self.phase = DragPhase::Committing { session, settle_at: now + self.grace };
        Ok(completion)
    }

    /// Discard the gesture without emitting anything and restore the marker.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::NotDragging`] outside `Dragging`.
    pub fn abort(&mut self, store: &mut AnnotationStore) -> Result<usize, DragError> {
        if !self.is_dragging() {
            return Err(DragError::NotDragging);
        }
        let DragPhase::Dragging(session) = std::mem::take(&mut self.phase) else {
            return Err(DragError::NotDragging);
        };
        let index = session.annotation_index;
        match session.prior_override {
            Some(position) => {
                store.set_override(index, position);
            }
            None => {
                store.clear_override(index);
            }
        }
        debug!(session = %session.id, index, "drag aborted");
        Ok(index)
    }

    /// Return to idle once the commit grace period has elapsed. Returns `true` on transition.
    pub fn settle(&mut self, now: Instant) -> bool {
        match &self.phase {
            DragPhase::Committing { settle_at, .. } if now >= *settle_at => {
                self.phase = DragPhase::Idle;
                true
            }
            _ => false,
        }
    }
}
