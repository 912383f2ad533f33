//! Outbound notifications to the rendering and chrome layer.

use crate::annotation::{Annotation, Position};
use crate::index_table::IndexTable;

/// Receives display-relevant state changes and user-facing errors.
///
/// Callbacks run synchronously, in order, on the engine's thread of control.
/// Implementations must not call back into the engine.
pub trait SyncObserver: Send + Sync {
    /// The canonical set or the override table changed. The chrome re-renders
    /// markers from these two alone: an override, when present, is where the
    /// marker for that index is drawn.
    fn on_state_changed(&self, annotations: &[Annotation], overrides: &IndexTable<Position>);

    /// A persistence call failed. Fired once per failure.
    fn on_error(&self, _message: &str) {}
}
