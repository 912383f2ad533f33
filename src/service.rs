//! Async driver: one tokio task that owns the engine.
//!
//! DESIGN
//! ======
//! The engine is synchronous and single-owner, so the service runs it inside
//! a single spawned task and talks to it over channels. The task selects over
//! four event sources:
//!
//! - commands from [`SyncHandle`] (the inbound editor API)
//! - sibling messages from the bus
//! - results of persistence calls it spawned
//! - the engine's next deadline (quiet window, spacing, drag grace)
//!
//! After every event it polls the engine, spawns any persistence call that
//! came due, and publishes the engine's outbox to the bus. Each event is
//! handled to completion before the next is taken, which preserves the FIFO
//! processing order of envelopes.
//!
//! Persistence calls run in their own tasks so the loop keeps serving drag
//! samples while a call is outstanding. They are never cancelled; a result
//! that arrives after shutdown is discarded.

#[cfg(test)]
#[path = "service_test.rs"]
mod service_test;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::annotation::{Annotation, Position};
use crate::bus::{BusEndpoint, BusMessage};
use crate::clock::Timestamp;
use crate::drag::SessionId;
use crate::engine::{SyncEngine, Verdict};
use crate::envelope::Change;
use crate::error::{DragError, PersistError, ServiceError};
use crate::queue::PersistRequest;

/// Command channel depth between handles and the service task.
const COMMAND_CAPACITY: usize = 256;

/// The external persistence collaborator: one idempotent upsert of the whole set.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Persist `annotations` and return the server's view of them.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if the server rejects the set or cannot be reached.
    async fn persist(&self, annotations: &[Annotation]) -> Result<Vec<Annotation>, PersistError>;
}

/// Point-in-time view of the engine, for hosts and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Display state, overrides folded in.
    pub annotations: Vec<Annotation>,
    pub canonical: Vec<Annotation>,
    pub overrides: Vec<(usize, Position)>,
    pub persisting: bool,
}

impl Snapshot {
    fn of(engine: &SyncEngine) -> Self {
        Self {
            annotations: engine.annotations(),
            canonical: engine.canonical().to_vec(),
            overrides: engine.overrides().iter().map(|(index, position)| (index, *position)).collect(),
            persisting: engine.is_persisting(),
        }
    }
}

enum Command {
    DragStart { index: usize, reply: oneshot::Sender<Result<SessionId, DragError>> },
    DragMove { index: usize, position: Position, reply: oneshot::Sender<Result<(), DragError>> },
    DragEnd { index: usize, position: Position, reply: oneshot::Sender<Result<Verdict, DragError>> },
    DragAbort { reply: oneshot::Sender<Result<usize, DragError>> },
    External { annotations: serde_json::Value, timestamp: Timestamp, source: String, reply: oneshot::Sender<Verdict> },
    Local { change: Change, reply: oneshot::Sender<Verdict> },
    ClearOverride { index: usize, reply: oneshot::Sender<Option<Position>> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
    Shutdown { reply: oneshot::Sender<Snapshot> },
}

type PersistResult = (u64, Result<Vec<Annotation>, PersistError>);

/// Cloneable handle to a running sync service.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
}

/// Start the service task. `bus` is this editor's endpoint on the sibling bus, if any.
pub fn spawn(engine: SyncEngine, persistence: Arc<dyn Persistence>, bus: Option<BusEndpoint>) -> SyncHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    info!(subject = %engine.config().subject, bus = bus.is_some(), "sync service started");
    tokio::spawn(run(engine, persistence, bus, rx));
    SyncHandle { tx }
}

impl SyncHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| ServiceError::Closed)?;
        rx.await.map_err(|_| ServiceError::Closed)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Drag`] if a gesture is already in progress or
    /// `index` does not exist, and [`ServiceError::Closed`] after shutdown.
    pub async fn drag_start(&self, index: usize) -> Result<SessionId, ServiceError> {
        Ok(self.call(|reply| Command::DragStart { index, reply }).await??)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Drag`] outside a gesture on `index`.
    pub async fn drag_move(&self, index: usize, position: Position) -> Result<(), ServiceError> {
        Ok(self.call(|reply| Command::DragMove { index, position, reply }).await??)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Drag`] outside a gesture on `index`.
    pub async fn drag_end(&self, index: usize, position: Position) -> Result<Verdict, ServiceError> {
        Ok(self.call(|reply| Command::DragEnd { index, position, reply }).await??)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Drag`] if no gesture is in progress.
    pub async fn drag_abort(&self) -> Result<usize, ServiceError> {
        Ok(self.call(|reply| Command::DragAbort { reply }).await??)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Closed`] after shutdown.
    pub async fn external_annotations_replaced(
        &self,
        annotations: serde_json::Value,
        timestamp: Timestamp,
        source: &str,
    ) -> Result<Verdict, ServiceError> {
        let source = source.to_owned();
        self.call(|reply| Command::External { annotations, timestamp, source, reply }).await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Closed`] after shutdown.
    pub async fn local_change(&self, change: Change) -> Result<Verdict, ServiceError> {
        self.call(|reply| Command::Local { change, reply }).await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Closed`] after shutdown.
    pub async fn clear_override(&self, index: usize) -> Result<Option<Position>, ServiceError> {
        self.call(|reply| Command::ClearOverride { index, reply }).await
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Closed`] after shutdown.
    pub async fn snapshot(&self) -> Result<Snapshot, ServiceError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the service and return its final state. In-flight persistence
    /// calls finish on their own; their results are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Closed`] if the service already stopped.
    pub async fn shutdown(&self) -> Result<Snapshot, ServiceError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}

async fn run(
    mut engine: SyncEngine,
    persistence: Arc<dyn Persistence>,
    mut bus: Option<BusEndpoint>,
    mut rx: mpsc::Receiver<Command>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PersistResult>();

    loop {
        let deadline = engine.deadline();
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("all sync handles dropped");
                    break;
                };
                if let Command::Shutdown { reply } = command {
                    respond(reply, Snapshot::of(&engine));
                    break;
                }
                handle(&mut engine, command);
            }
            Some(message) = next_bus_message(&mut bus) => {
                let verdict = engine.on_bus_message(message, Instant::now());
                debug!(?verdict, "bus message processed");
            }
            Some((request, result)) = done_rx.recv() => {
                let verdict = engine.on_persistence_result(request, result, Instant::now());
                debug!(request, ?verdict, "persistence result processed");
            }
            () = sleep_until_deadline(deadline) => {}
        }

        if let Some(request) = engine.poll(Instant::now()) {
            dispatch(Arc::clone(&persistence), request, done_tx.clone());
        }
        if let Some(endpoint) = &bus {
            for message in engine.drain_outbox() {
                let reached = endpoint.publish(message);
                debug!(reached, "local change announced");
            }
        } else {
            engine.drain_outbox();
        }
    }
    info!(subject = %engine.config().subject, "sync service stopped");
}

fn handle(engine: &mut SyncEngine, command: Command) {
    let now = Instant::now();
    match command {
        Command::DragStart { index, reply } => respond(reply, engine.on_drag_start(index, now)),
        Command::DragMove { index, position, reply } => respond(reply, engine.on_drag_move(index, position)),
        Command::DragEnd { index, position, reply } => respond(reply, engine.on_drag_end(index, position, now)),
        Command::DragAbort { reply } => respond(reply, engine.on_drag_abort()),
        Command::External { annotations, timestamp, source, reply } => {
            respond(reply, engine.on_external_annotations_replaced(annotations, timestamp, &source, now));
        }
        Command::Local { change, reply } => respond(reply, engine.on_local_change(change, now)),
        Command::ClearOverride { index, reply } => respond(reply, engine.clear_override(index)),
        Command::Snapshot { reply } | Command::Shutdown { reply } => respond(reply, Snapshot::of(engine)),
    }
}

fn dispatch(persistence: Arc<dyn Persistence>, request: PersistRequest, done: mpsc::UnboundedSender<PersistResult>) {
    tokio::spawn(async move {
        let result = persistence.persist(&request.annotations).await;
        if done.send((request.id, result)).is_err() {
            debug!(request = request.id, "persistence result arrived after shutdown");
        }
    });
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("caller went away before the reply");
    }
}

async fn next_bus_message(bus: &mut Option<BusEndpoint>) -> Option<BusMessage> {
    match bus {
        Some(endpoint) => endpoint.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
