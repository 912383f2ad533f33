//! Debounced persistence queue.
//!
//! DESIGN
//! ======
//! A sans-io state machine: it never sleeps and never calls the persistence
//! collaborator itself. The owner asks [`PersistenceQueue::deadline`] when to
//! wake up, calls [`PersistenceQueue::poll`] at that instant, performs the
//! returned [`PersistRequest`], and feeds the outcome back through
//! [`PersistenceQueue::complete`]. That keeps every timing rule testable with
//! plain `Instant` arithmetic.
//!
//! Rules:
//!
//! - Only the latest desired set is kept. A passive edit restarts the quiet
//!   window; an immediate one (drag end) is due at once and is never pushed
//!   back by a later passive edit.
//! - At most one call is in flight. Enqueues during a call update the desired
//!   set; it is flushed after the call resolves.
//! - Two calls are at least `min_spacing` apart.
//! - A desired set equal to the last successfully sent payload is dropped
//!   without a call.
//!
//! ERROR HANDLING
//! ==============
//! A failed call is not retried. The queue hands back the last known-good
//! snapshot for the revert and forgets the desired set, since the revert
//! supersedes it.

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::annotation::Annotation;
use crate::clock::Timestamp;
use crate::error::PersistError;

/// How soon an enqueued set should be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Wait for the quiet window.
    Passive,
    /// Flush as soon as spacing allows.
    Immediate,
}

/// One outbound persistence call to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistRequest {
    pub id: u64,
    pub annotations: Vec<Annotation>,
    /// Clock reading at dispatch; the confirmation is ordered by it.
    pub stamp: Timestamp,
}

/// Result of [`PersistenceQueue::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// Nothing due.
    Idle,
    /// The due set matched the last sent payload and was dropped.
    Suppressed,
    Send(PersistRequest),
}

/// Outcome of a finished call, ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Confirmed { annotations: Vec<Annotation>, stamp: Timestamp },
    Failed { snapshot: Vec<Annotation>, error: PersistError },
}

#[derive(Debug, Clone)]
struct Pending {
    annotations: Vec<Annotation>,
    due_at: Instant,
    urgency: Urgency,
}

#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    payload: Vec<Annotation>,
    stamp: Timestamp,
}

pub struct PersistenceQueue {
    quiet_window: Duration,
    min_spacing: Duration,
    pending: Option<Pending>,
    in_flight: Option<InFlight>,
    last_sent: Option<Vec<Annotation>>,
    known_good: Vec<Annotation>,
    last_dispatch: Option<Instant>,
    next_id: u64,
}

impl PersistenceQueue {
    #[must_use]
    pub fn new(quiet_window: Duration, min_spacing: Duration) -> Self {
        Self {
            quiet_window,
            min_spacing,
            pending: None,
            in_flight: None,
            last_sent: None,
            known_good: Vec::new(),
            last_dispatch: None,
            next_id: 1,
        }
    }

    /// Record `annotations` as the latest desired persisted state.
    pub fn enqueue(&mut self, annotations: Vec<Annotation>, urgency: Urgency, now: Instant) {
        let mut due_at = match urgency {
            Urgency::Passive => now + self.quiet_window,
            Urgency::Immediate => now,
        };
        let mut urgency = urgency;
        if let Some(prev) = &self.pending {
            if prev.urgency == Urgency::Immediate {
                due_at = due_at.min(prev.due_at);
                urgency = Urgency::Immediate;
            }
        }
        debug!(len = annotations.len(), ?urgency, "persistence enqueued");
        self.pending = Some(Pending { annotations, due_at, urgency });
    }

    /// When [`Self::poll`] should next be called, if anything is waiting.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        let pending = self.pending.as_ref()?;
        let spaced = self.last_dispatch.map(|at| at + self.min_spacing);
        Some(spaced.map_or(pending.due_at, |spaced| spaced.max(pending.due_at)))
    }

    /// Flush the desired set if it is due. `stamp` is read only when a call is dispatched.
    pub fn poll(&mut self, now: Instant, stamp: impl FnOnce() -> Timestamp) -> Flush {
        match self.deadline() {
            Some(deadline) if deadline <= now => {}
            _ => return Flush::Idle,
        }
        let Some(pending) = self.pending.take() else {
            return Flush::Idle;
        };

        if self.last_sent.as_deref().is_some_and(|sent| same_payload(sent, &pending.annotations)) {
            debug!(len = pending.annotations.len(), "persistence suppressed: matches last sent payload");
            return Flush::Suppressed;
        }

        let request = PersistRequest { id: self.next_id, annotations: pending.annotations, stamp: stamp() };
        self.next_id += 1;
        self.in_flight = Some(InFlight { id: request.id, payload: request.annotations.clone(), stamp: request.stamp });
        self.last_dispatch = Some(now);
        Flush::Send(request)
    }

    /// Resolve the in-flight call `id`. Returns `None` for an unknown id.
    pub fn complete(&mut self, id: u64, result: Result<Vec<Annotation>, PersistError>) -> Option<Completion> {
        if self.in_flight.as_ref().is_none_or(|flight| flight.id != id) {
            warn!(request = id, "completion for unknown persistence request ignored");
            return None;
        }
        let flight = self.in_flight.take()?;
        match result {
            Ok(confirmed) => {
                self.last_sent = Some(flight.payload);
                self.known_good.clone_from(&confirmed);
                Some(Completion::Confirmed { annotations: confirmed, stamp: flight.stamp })
            }
            Err(error) => {
                if self.pending.take().is_some() {
                    debug!(request = id, "desired set discarded after failed persistence call");
                }
                Some(Completion::Failed { snapshot: self.known_good.clone(), error })
            }
        }
    }

    /// Record `annotations` as already persisted (initial load, authoritative sync).
    pub fn mark_synced(&mut self, annotations: &[Annotation]) {
        self.known_good = annotations.to_vec();
        self.last_sent = Some(annotations.to_vec());
    }

    /// Move the revert target to `annotations` after someone else's change was
    /// accepted. The suppression baseline is left alone: this editor never sent it.
    pub fn rebase_known_good(&mut self, annotations: Vec<Annotation>) {
        self.known_good = annotations;
    }

    /// Whether a self-originated set is waiting or being persisted.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.in_flight.is_some()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The snapshot a failed call reverts to.
    #[must_use]
    pub fn known_good(&self) -> &[Annotation] {
        &self.known_good
    }
}

/// Structural equality on what the server stores. Ids are server-assigned
/// and do not make two payloads different.
fn same_payload(a: &[Annotation], b: &[Annotation]) -> bool {
    #[allow(clippy::float_cmp)]
    let same = |x: &Annotation, y: &Annotation| {
        x.longitude == y.longitude && x.latitude == y.latitude && x.radius == y.radius
    };
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same(x, y))
}
