//! Synchronization engine for geospatial annotations in the location-question editor.
//!
//! The editor renders a map of point-plus-radius annotations. Updates reach it
//! from several independent sources: a remote server that may answer late or out
//! of order, the user's drag gesture, sibling editor components broadcasting
//! their own edits, and persistence success/failure signals. This crate keeps a
//! single canonical annotation set consistent across all of them, never
//! disturbs a drag in progress, and coalesces local edits into debounced
//! persistence calls.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`annotation`] | Annotation records, positions, and coordinate sanitization |
//! | [`index_table`] | Index-keyed side table re-keyed on insert/remove |
//! | [`store`] | Canonical annotation set plus advisory position overrides |
//! | [`envelope`] | The normalized update envelope and its change kinds |
//! | [`gateway`] | Normalizes every raw update source into an envelope |
//! | [`resolver`] | Accept / reject / merge decisions for incoming envelopes |
//! | [`drag`] | Drag gesture state machine |
//! | [`queue`] | Debounced, de-duplicated persistence scheduling |
//! | [`bus`] | Typed broadcast bus between sibling editor components |
//! | [`engine`] | Synchronous core that wires the components together |
//! | [`service`] | Async driver owning the engine, timers, and persistence calls |
//! | [`clock`] | Logical timestamps for self-produced envelopes |
//! | [`config`] | Environment-driven tuning |
//! | [`consts`] | Default timing and geometry constants |
//! | [`error`] | Error types |
//! | [`observer`] | Outbound notifications to the rendering layer |

pub mod annotation;
pub mod bus;
pub mod clock;
pub mod config;
pub mod consts;
pub mod drag;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod index_table;
pub mod observer;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod store;
