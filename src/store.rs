//! Annotation store: the single writer of the canonical annotation set.
//!
//! DESIGN
//! ======
//! The store owns two things: the canonical ordered set, and a side table of
//! advisory position overrides keyed by index. Overrides record where a
//! marker was last dragged to while the persistence round trip is still
//! pending, so the marker never snaps back and forth. They are display data
//! only: [`AnnotationStore::get`] folds them in, the canonical set never
//! does.
//!
//! Every mutation goes through [`AnnotationStore::apply`] with a
//! [`StoreUpdate`] produced by the resolver. The one exception is the
//! override table, which the drag session writes directly.
//!
//! Observers are notified synchronously, in order, once per effective change.
//! A mutation that leaves both the set and the overrides as they were emits
//! nothing.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::sync::Arc;

use tracing::debug;

use crate::annotation::{Annotation, Position, Sanitizer, renumber};
use crate::index_table::IndexTable;
use crate::observer::SyncObserver;

/// What to do with the override table when a resolved change is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum OverridePlan {
    /// Same-length change: drop the overrides at these indices (confirmed by the payload).
    Confirm(Vec<usize>),
    /// An annotation was inserted at this index.
    Inserted(usize),
    /// The annotation at this index was removed.
    Removed(usize),
    /// Whole-set structural replace or revert: drop every override, then hold
    /// the pinned index at the given position.
    Reset { pin: Option<(usize, Position)> },
}

/// A resolved mutation, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreUpdate {
    /// The complete canonical set after the change.
    pub next: Vec<Annotation>,
    pub overrides: OverridePlan,
}

/// Canonical annotation set plus advisory overrides.
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    overrides: IndexTable<Position>,
    sanitizer: Sanitizer,
    observers: Vec<Arc<dyn SyncObserver>>,
}

impl AnnotationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(sanitizer: Sanitizer) -> Self {
        Self { annotations: Vec::new(), overrides: IndexTable::default(), sanitizer, observers: Vec::new() }
    }

    /// Create a store seeded with `annotations`. Does not notify.
    #[must_use]
    pub fn with_annotations(sanitizer: Sanitizer, annotations: Vec<Annotation>) -> Self {
        let mut store = Self::new(sanitizer);
        store.annotations = store.sanitized(annotations);
        store.overrides.reset(store.annotations.len());
        store
    }

    pub fn subscribe(&mut self, observer: Arc<dyn SyncObserver>) {
        self.observers.push(observer);
    }

    // --- Queries ---

    /// Current state for display: canonical annotations with overrides folded in.
    #[must_use]
    pub fn get(&self) -> Vec<Annotation> {
        let mut display = self.annotations.clone();
        for (index, position) in self.overrides.iter() {
            if let Some(annotation) = display.get_mut(index) {
                annotation.set_position(*position);
            }
        }
        display
    }

    /// Canonical state, without overrides.
    #[must_use]
    pub fn canonical(&self) -> &[Annotation] {
        &self.annotations
    }

    #[must_use]
    pub fn overrides(&self) -> &IndexTable<Position> {
        &self.overrides
    }

    #[must_use]
    pub fn override_at(&self, index: usize) -> Option<Position> {
        self.overrides.get(index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    // --- Mutations ---

    /// Apply a resolved change. Returns `true` if anything display-relevant changed.
    ///
    /// Never fails: invalid coordinates in `next` are substituted, not rejected.
    pub fn apply(&mut self, update: StoreUpdate) -> bool {
        let next = self.sanitized(update.next);
        let before_overrides = self.overrides.clone();

        match update.overrides {
            OverridePlan::Confirm(indices) => {
                for index in indices {
                    self.overrides.take(index);
                }
            }
            OverridePlan::Inserted(index) => self.overrides.insert_slot(index),
            OverridePlan::Removed(index) => {
                self.overrides.remove_slot(index);
            }
            OverridePlan::Reset { pin } => {
                self.overrides.reset(next.len());
                if let Some((index, position)) = pin.filter(|(index, _)| *index < next.len()) {
                    self.overrides.set(index, position);
                }
            }
        }
        self.overrides.resize(next.len());

        let set_changed = next != self.annotations;
        self.annotations = next;
        let changed = set_changed || self.overrides != before_overrides;
        if changed {
            self.notify();
        } else {
            debug!(len = self.annotations.len(), "store apply was a no-op");
        }
        changed
    }

    /// Record where the marker at `index` should be drawn. Returns `false` if out of range.
    pub fn set_override(&mut self, index: usize, position: Position) -> bool {
        if index >= self.annotations.len() {
            return false;
        }
        if self.overrides.get(index) == Some(&position) {
            return true;
        }
        self.overrides.set(index, position);
        self.notify();
        true
    }

    /// Drop the override at `index`, returning it if one existed.
    pub fn clear_override(&mut self, index: usize) -> Option<Position> {
        let removed = self.overrides.take(index);
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    pub fn clear_all_overrides(&mut self) {
        if self.overrides.is_empty() {
            return;
        }
        self.overrides.clear();
        self.notify();
    }

    /// Drop every override that already matches the canonical position within `epsilon`.
    pub fn clear_confirmed_overrides(&mut self, epsilon: f64) -> usize {
        let before = self.overrides.count();
        let annotations = &self.annotations;
        self.overrides.retain(|index, position| {
            annotations
                .get(index)
                .is_none_or(|annotation| !annotation.position().approx_eq(position, epsilon))
        });
        let cleared = before - self.overrides.count();
        if cleared > 0 {
            self.notify();
        }
        cleared
    }

    fn sanitized(&self, mut annotations: Vec<Annotation>) -> Vec<Annotation> {
        renumber(&mut annotations);
        for annotation in &mut annotations {
            self.sanitizer.repair(annotation);
        }
        annotations
    }

    fn notify(&self) {
        for observer in &self.observers {
            observer.on_state_changed(&self.annotations, &self.overrides);
        }
    }
}
