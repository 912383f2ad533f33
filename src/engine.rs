//! Synchronous core that wires the five components together.
//!
//! DESIGN
//! ======
//! [`SyncEngine`] is the inbound API the hosting editor talks to. Every
//! update, whatever its origin, takes the same path:
//!
//! `RawUpdate → Gateway → ConflictResolver → AnnotationStore`
//!
//! and accepted self-produced changes continue into the persistence queue.
//! The engine holds no timers and performs no I/O. Time is passed in as a
//! `tokio::time::Instant`; the owner sleeps until [`SyncEngine::deadline`],
//! calls [`SyncEngine::poll`], performs the returned request, and reports
//! back through [`SyncEngine::on_persistence_result`]. The async driver in
//! [`crate::service`] does exactly that; tests drive it by hand.
//!
//! Envelopes are processed one at a time in arrival order; each call runs
//! to completion before the next.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::annotation::{Annotation, AnnotationRecord, Position};
use crate::bus::BusMessage;
use crate::clock::{HybridClock, Timestamp};
use crate::config::SyncConfig;
use crate::drag::{DragPhase, DragSessionManager, SessionId};
use crate::envelope::{Change, Source, UpdateEnvelope};
use crate::error::{DragError, PersistError};
use crate::gateway::{Gateway, RawUpdate};
use crate::index_table::IndexTable;
use crate::observer::SyncObserver;
use crate::queue::{Completion, Flush, PersistRequest, PersistenceQueue, Urgency};
use crate::resolver::{ConflictResolver, Decision, RejectReason};
use crate::store::AnnotationStore;

/// What happened to one inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Malformed or unknown; never reached the resolver.
    Dropped,
    Accepted,
    /// Accepted except for `kept` indices.
    Merged { kept: Vec<usize> },
    Rejected(RejectReason),
}

impl Verdict {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Accepted | Self::Merged { .. })
    }
}

/// The synchronization engine for one annotation set.
pub struct SyncEngine {
    config: SyncConfig,
    store: AnnotationStore,
    gateway: Gateway,
    resolver: ConflictResolver,
    drag: DragSessionManager,
    queue: PersistenceQueue,
    clock: HybridClock,
    observers: Vec<Arc<dyn SyncObserver>>,
    outbox: Vec<BusMessage>,
}

impl SyncEngine {
    /// Create an engine seeded with the persisted set `initial`.
    #[must_use]
    pub fn new(config: SyncConfig, initial: Vec<Annotation>) -> Self {
        let sanitizer = config.sanitizer();
        let store = AnnotationStore::with_annotations(sanitizer, initial);
        let mut queue = PersistenceQueue::new(config.quiet_window, config.min_spacing);
        queue.mark_synced(store.canonical());
        Self {
            resolver: ConflictResolver::new(config.epsilon_deg, store.len()),
            drag: DragSessionManager::new(config.drag_grace),
            gateway: Gateway::new(sanitizer),
            clock: HybridClock::new(),
            observers: Vec::new(),
            outbox: Vec::new(),
            store,
            queue,
            config,
        }
    }

    /// Create an engine from wire records, as loaded from the server.
    #[must_use]
    pub fn from_records(config: SyncConfig, records: &[AnnotationRecord]) -> Self {
        let initial = config.sanitizer().annotations(records);
        Self::new(config, initial)
    }

    /// Register a renderer / error sink. Notified synchronously, in order.
    pub fn subscribe(&mut self, observer: Arc<dyn SyncObserver>) {
        self.store.subscribe(observer.clone());
        self.observers.push(observer);
    }

    // --- Drag gesture ---

    /// # Errors
    ///
    /// See [`DragSessionManager::begin`].
    pub fn on_drag_start(&mut self, index: usize, now: Instant) -> Result<SessionId, DragError> {
        self.drag.begin(index, &self.store, now)
    }

    /// # Errors
    ///
    /// See [`DragSessionManager::move_to`].
    pub fn on_drag_move(&mut self, index: usize, position: Position) -> Result<(), DragError> {
        self.drag.move_to(index, position, &mut self.store)
    }

    /// Finish the gesture at `position` and submit it as a drag-end point update.
    ///
    /// # Errors
    ///
    /// Returns a [`DragError`] if no gesture is in progress on `index`.
    pub fn on_drag_end(&mut self, index: usize, position: Position, now: Instant) -> Result<Verdict, DragError> {
        self.drag.move_to(index, position, &mut self.store)?;
        let completion = self.drag.commit(now)?;
        Ok(self.process(RawUpdate::DragEnd(completion), now))
    }

    /// Cancel the gesture and put the marker back where it was.
    ///
    /// # Errors
    ///
    /// Returns [`DragError::NotDragging`] if no gesture is in progress.
    pub fn on_drag_abort(&mut self) -> Result<usize, DragError> {
        self.drag.abort(&mut self.store)
    }

    // --- Inbound updates ---

    /// The hosting editor replaced the whole set (prop update).
    pub fn on_external_annotations_replaced(
        &mut self,
        annotations: serde_json::Value,
        timestamp: Timestamp,
        source: &str,
        now: Instant,
    ) -> Verdict {
        let raw = RawUpdate::External { annotations, timestamp, source: source.to_owned() };
        self.process(raw, now)
    }

    /// An edit from this editor's own chrome (radius slider, add / remove location).
    pub fn on_local_change(&mut self, change: Change, now: Instant) -> Verdict {
        self.process(RawUpdate::Local(change), now)
    }

    /// A message from a sibling component.
    pub fn on_bus_message(&mut self, message: BusMessage, now: Instant) -> Verdict {
        self.process(RawUpdate::Bus(message), now)
    }

    /// Outcome of the persistence call `request`.
    ///
    /// A failure is reported once through [`SyncObserver::on_error`] and then
    /// rolled back with a revert to the last known-good snapshot.
    pub fn on_persistence_result(
        &mut self,
        request: u64,
        result: Result<Vec<Annotation>, PersistError>,
        now: Instant,
    ) -> Verdict {
        let Some(completion) = self.queue.complete(request, result) else {
            return Verdict::Dropped;
        };
        match completion {
            Completion::Confirmed { annotations, stamp } => {
                info!(subject = %self.config.subject, request, len = annotations.len(), "persistence confirmed");
                self.process(RawUpdate::PersistenceSucceeded { annotations, dispatched_at: stamp }, now)
            }
            Completion::Failed { snapshot, error } => {
                error!(
                    subject = %self.config.subject,
                    request,
                    code = error.error_code(),
                    error = %error,
                    "persistence failed; reverting to last known-good"
                );
                let message = error.to_string();
                for observer in &self.observers {
                    observer.on_error(&message);
                }
                self.process(RawUpdate::PersistenceFailed { snapshot }, now)
            }
        }
    }

    // --- Timers ---

    /// Earliest instant at which [`Self::poll`] has work to do.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match (self.drag.deadline(), self.queue.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Settle an expired drag grace period and flush the queue if due.
    ///
    /// Returns the persistence call to perform, if one was dispatched.
    pub fn poll(&mut self, now: Instant) -> Option<PersistRequest> {
        if self.drag.settle(now) {
            debug!("drag grace period elapsed");
        }
        match self.queue.poll(now, || self.clock.tick()) {
            Flush::Idle => None,
            Flush::Suppressed => {
                // Nothing to confirm remotely: overrides already matching canonical are done.
                let cleared = self.store.clear_confirmed_overrides(self.config.epsilon_deg);
                if cleared > 0 {
                    debug!(cleared, "overrides cleared after suppressed flush");
                }
                None
            }
            Flush::Send(request) => {
                info!(
                    subject = %self.config.subject,
                    request = request.id,
                    len = request.annotations.len(),
                    stamp = request.stamp.as_millis(),
                    "persistence call dispatched"
                );
                Some(request)
            }
        }
    }

    // --- Overrides ---

    /// Declare the override at `index` obsolete.
    pub fn clear_override(&mut self, index: usize) -> Option<Position> {
        self.store.clear_override(index)
    }

    pub fn clear_all_overrides(&mut self) {
        self.store.clear_all_overrides();
    }

    // --- Queries ---

    /// Current display state: canonical annotations with overrides folded in.
    #[must_use]
    pub fn annotations(&self) -> Vec<Annotation> {
        self.store.get()
    }

    #[must_use]
    pub fn canonical(&self) -> &[Annotation] {
        self.store.canonical()
    }

    #[must_use]
    pub fn overrides(&self) -> &IndexTable<Position> {
        self.store.overrides()
    }

    #[must_use]
    pub fn drag_phase(&self) -> &DragPhase {
        self.drag.phase()
    }

    #[must_use]
    pub fn is_persisting(&self) -> bool {
        self.queue.is_in_flight()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bus messages announcing accepted local changes, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<BusMessage> {
        std::mem::take(&mut self.outbox)
    }

    // --- Internals ---

    fn process(&mut self, raw: RawUpdate, now: Instant) -> Verdict {
        let stamp = self.clock.tick();
        let Some(envelope) = self.gateway.normalize(raw, stamp) else {
            return Verdict::Dropped;
        };
        let decision =
            self.resolver.resolve(self.store.canonical(), self.store.overrides(), self.drag.guard(), &envelope);
        let verdict = match decision {
            Decision::Reject(reason) => return Verdict::Rejected(reason),
            Decision::Accept(update) => {
                self.store.apply(update);
                Verdict::Accepted
            }
            Decision::Merge { update, kept } => {
                self.store.apply(update);
                Verdict::Merged { kept }
            }
        };
        let kept: &[usize] = match &verdict {
            Verdict::Merged { kept } => kept.as_slice(),
            _ => &[],
        };
        debug!(
            envelope = %envelope.id,
            source = %envelope.source,
            kind = ?envelope.kind(),
            len = self.store.len(),
            "envelope applied"
        );
        self.after_apply(&envelope, kept, now);
        verdict
    }

    fn after_apply(&mut self, envelope: &UpdateEnvelope, kept: &[usize], now: Instant) {
        self.clock.observe(envelope.timestamp);
        match &envelope.source {
            Source::Local => {
                self.queue.enqueue(self.store.canonical().to_vec(), Urgency::Passive, now);
                self.announce(envelope);
            }
            Source::DragEnd(_) => {
                self.queue.enqueue(self.store.canonical().to_vec(), Urgency::Immediate, now);
                self.announce(envelope);
            }
            Source::ExternalSync | Source::Peer(_) => match &envelope.change {
                Change::Replace(payload) if matches!(envelope.source, Source::ExternalSync) => {
                    self.queue.mark_synced(payload);
                }
                change => self.rebase_known_good(change, kept),
            },
            Source::ServerSuccess | Source::ServerErrorRevert => {}
        }
    }

    /// Fold an accepted foreign change into the revert target, so a failed
    /// save of this editor's own edits does not roll it back.
    fn rebase_known_good(&mut self, change: &Change, kept: &[usize]) {
        if !self.queue.is_busy() {
            self.queue.rebase_known_good(self.store.canonical().to_vec());
            return;
        }
        let base = self.queue.known_good();
        let Some(mut next) = change.apply_to(base) else {
            debug!(kind = ?change.kind(), "foreign change does not fit the known-good snapshot");
            return;
        };
        if next.len() == base.len() {
            for &index in kept {
                if let (Some(slot), Some(original)) = (next.get_mut(index), base.get(index)) {
                    *slot = original.clone();
                }
            }
        }
        self.queue.rebase_known_good(next);
    }

    fn announce(&mut self, envelope: &UpdateEnvelope) {
        let message = match &envelope.change {
            Change::RadiusUpdate { index, radius } => {
                BusMessage::RadiusChanged { index: *index, radius: *radius, timestamp: Some(envelope.timestamp) }
            }
            _ => {
                let records: Vec<AnnotationRecord> =
                    self.store.canonical().iter().map(Annotation::to_record).collect();
                match serde_json::to_value(records) {
                    Ok(annotations) => BusMessage::AnnotationsReplaced {
                        annotations,
                        timestamp: Some(envelope.timestamp),
                        source: envelope.source.tag().to_owned(),
                    },
                    Err(e) => {
                        warn!(error = %e, "could not encode annotations for the bus");
                        return;
                    }
                }
            }
        };
        self.outbox.push(message);
    }
}
