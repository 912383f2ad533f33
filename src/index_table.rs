//! Index-keyed side table for per-annotation bookkeeping.
//!
//! Annotations are addressed by position, so anything keyed by index goes
//! stale the moment an annotation is inserted or removed in front of it.
//! `IndexTable` keeps one optional slot per annotation and shifts its slots
//! on structural edits, so an entry always follows the annotation it was
//! recorded for. Used for position overrides and per-index acceptance stamps.

#[cfg(test)]
#[path = "index_table_test.rs"]
mod index_table_test;

/// One optional value per annotation index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for IndexTable<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> IndexTable<T> {
    /// An empty table tracking `len` annotations.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots }
    }

    /// Number of annotation slots tracked (occupied or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no slot holds a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Store a value. Returns `false` (and stores nothing) if `index` is out of range.
    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn take(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Empty every slot, keeping the tracked length.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Track an annotation inserted at `index`; later entries shift up by one.
    pub fn insert_slot(&mut self, index: usize) {
        let index = index.min(self.slots.len());
        self.slots.insert(index, None);
    }

    /// Track removal of the annotation at `index`; later entries shift down by one.
    pub fn remove_slot(&mut self, index: usize) -> Option<T> {
        if index < self.slots.len() { self.slots.remove(index) } else { None }
    }

    /// Re-validate against a new annotation count. Entries beyond `len` are dropped.
    pub fn resize(&mut self, len: usize) {
        self.slots.truncate(len);
        self.slots.resize_with(len, || None);
    }

    /// Drop every entry and track `len` empty slots.
    pub fn reset(&mut self, len: usize) {
        self.slots.clear();
        self.slots.resize_with(len, || None);
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    /// Keep only entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &T) -> bool) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|value| !keep(index, value)) {
                *slot = None;
            }
        }
    }
}
