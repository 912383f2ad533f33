//! Conflict resolver: accept, reject, or merge an incoming envelope.
//!
//! DESIGN
//! ======
//! The resolver is pure decision logic over the current canonical set, the
//! override table, the active drag guard, and its own record of the most
//! recently accepted timestamp per scope (whole set, or one index). It never
//! mutates the store; an accepted envelope comes back as a [`StoreUpdate`]
//! for the store to apply.
//!
//! Decision procedure, in order:
//!
//! 1. `Revert` always wins. It restores its snapshot and drops every override.
//!    A gesture still in progress (not yet committed) keeps its marker under
//!    the pointer, whether or not it has moved yet.
//! 2. Drag isolation. While a session is dragging or committing, an envelope
//!    touching the dragged index is rejected unless it is that session's own
//!    drag-end point update (or, once committing, the server's confirmation).
//!    Structural changes touch every index.
//!    Same-length whole-set replaces are not rejected outright: the dragged
//!    index is kept and the rest may merge (step 5).
//! 3. Last-writer-wins per scope. An envelope strictly older than the last
//!    accepted one for its scope is rejected; on equal timestamps a
//!    self-sourced record beats a non-self envelope.
//! 4. Structural changes (insert, remove, different-length replace) are
//!    accepted whole; they cannot be merged index by index.
//! 5. Per-index merge. An index is kept at its canonical value when it
//!    carries an override that the incoming coordinates contradict beyond
//!    epsilon, or when that index alone has a newer accepted stamp. If nothing
//!    that differs survives, the envelope is rejected; if some survives, it
//!    is merged.
//!
//! An envelope whose id was already accepted is a replay. It is accepted as a
//! no-op so that applying the same envelope twice leaves the set unchanged.
//!
//! ERROR HANDLING
//! ==============
//! Rejections are ordinary outcomes, logged at `debug`. An envelope that
//! addresses a non-existent index is rejected as out of range.

#[cfg(test)]
#[path = "resolver_test.rs"]
mod resolver_test;

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::annotation::{Annotation, Position, renumber};
use crate::clock::Timestamp;
use crate::drag::DragGuard;
use crate::envelope::{Change, Scope, Source, UpdateEnvelope};
use crate::index_table::IndexTable;
use crate::store::{OverridePlan, StoreUpdate};

/// Why an envelope was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Touches the annotation under an active drag.
    DragActive,
    /// Older than the last accepted envelope for its scope.
    Stale,
    /// Every differing index conflicts with local truth (override or newer stamp).
    Conflict,
    /// Addresses an index that does not exist.
    OutOfRange,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DragActive => "drag-active",
            Self::Stale => "stale",
            Self::Conflict => "conflict",
            Self::OutOfRange => "out-of-range",
        })
    }
}

/// Outcome of resolving one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(StoreUpdate),
    /// Accepted except for `kept` indices, which retain their local value.
    Merge { update: StoreUpdate, kept: Vec<usize> },
    Reject(RejectReason),
}

impl Decision {
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

/// Acceptance record for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub timestamp: Timestamp,
    pub is_self: bool,
}

impl Stamp {
    fn of(envelope: &UpdateEnvelope) -> Self {
        Self { timestamp: envelope.timestamp, is_self: envelope.source.is_self() }
    }

    /// Whether this accepted record outranks an incoming stamp.
    #[must_use]
    pub fn supersedes(&self, incoming: &Stamp) -> bool {
        incoming.timestamp < self.timestamp
            || (incoming.timestamp == self.timestamp && self.is_self && !incoming.is_self)
    }
}

/// How many accepted envelope ids are remembered for replay detection.
const REPLAY_WINDOW: usize = 256;

/// Last-accepted bookkeeping plus the decision procedure.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    epsilon: f64,
    whole: Option<Stamp>,
    per_index: IndexTable<Stamp>,
    /// Ids of recently accepted envelopes, oldest first.
    accepted: VecDeque<Uuid>,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(epsilon: f64, len: usize) -> Self {
        Self { epsilon, whole: None, per_index: IndexTable::with_len(len), accepted: VecDeque::new() }
    }

    /// Last accepted record for `scope`, if any.
    #[must_use]
    pub fn last_accepted(&self, scope: Scope) -> Option<Stamp> {
        match scope {
            Scope::Whole => self.whole,
            Scope::Index(index) => self.per_index.get(index).copied(),
        }
    }

    /// Decide what to do with `envelope`, recording it as accepted if it is.
    pub fn resolve(
        &mut self,
        canonical: &[Annotation],
        overrides: &IndexTable<Position>,
        drag: Option<DragGuard>,
        envelope: &UpdateEnvelope,
    ) -> Decision {
        if self.accepted.contains(&envelope.id) {
            debug!(envelope = %envelope.id, source = %envelope.source, "replayed envelope ignored");
            let next = canonical.to_vec();
            return Decision::Accept(StoreUpdate { next, overrides: OverridePlan::Confirm(Vec::new()) });
        }
        let decision = self.decide(canonical, overrides, drag, envelope);
        match &decision {
            Decision::Reject(reason) => {
                debug!(
                    envelope = %envelope.id,
                    source = %envelope.source,
                    kind = ?envelope.kind(),
                    timestamp = envelope.timestamp.as_millis(),
                    %reason,
                    "envelope rejected"
                );
            }
            Decision::Accept(update) => self.record(envelope, update, &[]),
            Decision::Merge { update, kept } => {
                debug!(envelope = %envelope.id, source = %envelope.source, ?kept, "envelope merged");
                self.record(envelope, update, kept);
            }
        }
        decision
    }

    fn decide(
        &self,
        canonical: &[Annotation],
        overrides: &IndexTable<Position>,
        drag: Option<DragGuard>,
        envelope: &UpdateEnvelope,
    ) -> Decision {
        if let Change::Revert(snapshot) = &envelope.change {
            let pin = drag
                .filter(|guard| !guard.committing && guard.index < snapshot.len())
                .map(|guard| (guard.index, guard.position));
            let mut next = snapshot.clone();
            renumber(&mut next);
            return Decision::Accept(StoreUpdate { next, overrides: OverridePlan::Reset { pin } });
        }

        let structural = envelope.change.is_structural(canonical.len());
        let scope = envelope.scope();

        if let Some(guard) = drag {
            if !admits(guard, envelope) && (structural || matches!(scope, Scope::Index(i) if i == guard.index)) {
                return Decision::Reject(RejectReason::DragActive);
            }
        }

        let incoming = Stamp::of(envelope);
        if self.last_accepted(scope).is_some_and(|last| last.supersedes(&incoming)) {
            return Decision::Reject(RejectReason::Stale);
        }

        let Some(mut next) = envelope.change.apply_to(canonical) else {
            return Decision::Reject(RejectReason::OutOfRange);
        };

        if structural {
            let overrides = match &envelope.change {
                Change::Insert { index, .. } => OverridePlan::Inserted(*index),
                Change::Remove { index } => OverridePlan::Removed(*index),
                _ => OverridePlan::Reset { pin: None },
            };
            return Decision::Accept(StoreUpdate { next, overrides });
        }

        let admitted = drag.is_some_and(|guard| admits(guard, envelope));
        let is_drag_end = matches!(envelope.source, Source::DragEnd(_));
        let mut kept = Vec::new();
        let mut accepted_change = false;
        let mut confirmed = Vec::new();

        for index in 0..next.len() {
            let incoming_position = next[index].position();
            let pending = overrides.get(index);

            let drag_locked = drag.is_some_and(|guard| guard.index == index) && !admitted;
            let override_conflict = pending.is_some_and(|p| !p.approx_eq(&incoming_position, self.epsilon));
            let newer_here = scope == Scope::Whole
                && self.per_index.get(index).is_some_and(|last| last.supersedes(&incoming));

            if next[index] != canonical[index] && (drag_locked || override_conflict || newer_here) {
                next[index] = canonical[index].clone();
                kept.push(index);
                continue;
            }
            if drag_locked {
                continue;
            }
            if next[index] != canonical[index] {
                accepted_change = true;
            }
            if pending.is_some() && !override_conflict && !is_drag_end {
                confirmed.push(index);
            }
        }

        let update = StoreUpdate { next, overrides: OverridePlan::Confirm(confirmed) };
        if kept.is_empty() {
            Decision::Accept(update)
        } else if accepted_change || !matches!(&update.overrides, OverridePlan::Confirm(c) if c.is_empty()) {
            Decision::Merge { update, kept }
        } else {
            Decision::Reject(RejectReason::Conflict)
        }
    }

    fn record(&mut self, envelope: &UpdateEnvelope, update: &StoreUpdate, kept: &[usize]) {
        if self.accepted.len() == REPLAY_WINDOW {
            self.accepted.pop_front();
        }
        self.accepted.push_back(envelope.id);
        let stamp = Stamp::of(envelope);
        match &envelope.change {
            Change::Revert(_) => {
                self.per_index.reset(update.next.len());
            }
            Change::PointUpdate { index, .. } | Change::RadiusUpdate { index, .. } => {
                self.per_index.set(*index, stamp);
            }
            Change::Insert { index, .. } => {
                self.whole = Some(stamp);
                self.per_index.insert_slot(*index);
                self.per_index.set(*index, stamp);
            }
            Change::Remove { index } => {
                self.whole = Some(stamp);
                self.per_index.remove_slot(*index);
            }
            Change::Replace(_) => {
                self.whole = Some(stamp);
                if self.per_index.len() != update.next.len() {
                    self.per_index.reset(update.next.len());
                }
                for index in 0..update.next.len() {
                    if !kept.contains(&index) {
                        self.per_index.set(index, stamp);
                    }
                }
            }
        }
        self.per_index.resize(update.next.len());
    }
}

/// Whether `envelope` may touch the guarded index.
///
/// Only the session's own drag-end point update passes while dragging. Once
/// committing, the server's confirmation of that drag passes too.
fn admits(guard: DragGuard, envelope: &UpdateEnvelope) -> bool {
    match &envelope.source {
        Source::DragEnd(session) => {
            *session == guard.session
                && matches!(envelope.change, Change::PointUpdate { index, .. } if index == guard.index)
        }
        Source::ServerSuccess => guard.committing,
        _ => false,
    }
}
