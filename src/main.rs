use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use geosync::annotation::{Annotation, AnnotationRecord, Position};
use geosync::clock::Timestamp;
use geosync::config::SyncConfig;
use geosync::engine::SyncEngine;
use geosync::envelope::Change;
use geosync::error::{PersistError, ServiceError};
use geosync::index_table::IndexTable;
use geosync::observer::SyncObserver;
use geosync::service::{self, Persistence};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum ReplayError {
    #[error("failed to read script {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid script: {0}")]
    Script(#[from] serde_json::Error),
    #[error("step {step} failed: {source}")]
    Step { step: usize, source: ServiceError },
    #[error("shutdown failed: {0}")]
    Shutdown(ServiceError),
}

#[derive(Parser, Debug)]
#[command(name = "geosync", about = "Replay a scripted annotation sync session")]
struct Cli {
    /// JSON script: initial set, persistence outcomes, and steps.
    script: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    initial: Vec<AnnotationRecord>,
    /// Outcome of each persistence call in order; calls past the end succeed.
    #[serde(default)]
    persistence: Vec<Outcome>,
    /// Simulated round-trip time of each persistence call.
    #[serde(default)]
    latency_ms: u64,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Outcome {
    Ok,
    Fail { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    DragStart { index: usize },
    DragMove { index: usize, longitude: f64, latitude: f64 },
    DragEnd { index: usize, longitude: f64, latitude: f64 },
    DragAbort,
    External { annotations: serde_json::Value, timestamp: i64, source: String },
    SetRadius { index: usize, radius: f64 },
    Insert { index: usize, longitude: f64, latitude: f64, radius: Option<f64> },
    Remove { index: usize },
    ClearOverride { index: usize },
    Wait { ms: u64 },
}

/// In-process persistence that follows the script and assigns ids like a server would.
struct ScriptedPersistence {
    outcomes: Mutex<VecDeque<Outcome>>,
    latency: Duration,
}

#[async_trait::async_trait]
impl Persistence for ScriptedPersistence {
    async fn persist(&self, annotations: &[Annotation]) -> Result<Vec<Annotation>, PersistError> {
        tokio::time::sleep(self.latency).await;
        let outcome = match self.outcomes.lock() {
            Ok(mut outcomes) => outcomes.pop_front().unwrap_or(Outcome::Ok),
            Err(_) => return Err(PersistError::Transport("scripted outcomes poisoned".into())),
        };
        match outcome {
            Outcome::Ok => Ok(annotations
                .iter()
                .map(|a| Annotation { id: a.id.or_else(|| Some(Uuid::new_v4())), ..a.clone() })
                .collect()),
            Outcome::Fail { message } => Err(PersistError::Rejected(message)),
        }
    }
}

struct LogObserver;

impl SyncObserver for LogObserver {
    fn on_state_changed(&self, annotations: &[Annotation], overrides: &IndexTable<Position>) {
        let shown: Vec<String> = annotations
            .iter()
            .map(|a| format!("#{} ({:.5}, {:.5}) r={}", a.index, a.longitude, a.latitude, a.radius))
            .collect();
        info!(annotations = ?shown, overrides = overrides.count(), "state changed");
    }

    fn on_error(&self, message: &str) {
        error!(error = message, "persistence error reported to user");
    }
}

#[tokio::main]
async fn main() -> Result<(), ReplayError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.script)
        .map_err(|source| ReplayError::Read { path: cli.script.clone(), source })?;
    let script: Script = serde_json::from_str(&raw)?;

    let mut engine = SyncEngine::from_records(SyncConfig::from_env(), &script.initial);
    engine.subscribe(Arc::new(LogObserver));
    let persistence = Arc::new(ScriptedPersistence {
        outcomes: Mutex::new(script.persistence.into()),
        latency: Duration::from_millis(script.latency_ms),
    });
    let handle = service::spawn(engine, persistence, None);

    for (step, action) in script.steps.into_iter().enumerate() {
        info!(step, ?action, "replay step");
        run_step(&handle, action).await.map_err(|source| ReplayError::Step { step, source })?;
    }

    let last = handle.shutdown().await.map_err(ReplayError::Shutdown)?;
    let records: Vec<AnnotationRecord> = last.canonical.iter().map(Annotation::to_record).collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn run_step(handle: &service::SyncHandle, step: Step) -> Result<(), ServiceError> {
    match step {
        Step::DragStart { index } => {
            let session = handle.drag_start(index).await?;
            info!(%session, index, "drag started");
        }
        Step::DragMove { index, longitude, latitude } => {
            handle.drag_move(index, Position::new(longitude, latitude)).await?;
        }
        Step::DragEnd { index, longitude, latitude } => {
            let verdict = handle.drag_end(index, Position::new(longitude, latitude)).await?;
            info!(?verdict, "drag ended");
        }
        Step::DragAbort => {
            let index = handle.drag_abort().await?;
            info!(index, "drag aborted");
        }
        Step::External { annotations, timestamp, source } => {
            let verdict = handle.external_annotations_replaced(annotations, Timestamp(timestamp), &source).await?;
            info!(?verdict, "external replace");
        }
        Step::SetRadius { index, radius } => {
            let verdict = handle.local_change(Change::RadiusUpdate { index, radius }).await?;
            info!(?verdict, "radius changed");
        }
        Step::Insert { index, longitude, latitude, radius } => {
            let annotation = Annotation::new(longitude, latitude, radius.unwrap_or(0.0));
            let verdict = handle.local_change(Change::Insert { index, annotation }).await?;
            info!(?verdict, "annotation inserted");
        }
        Step::Remove { index } => {
            let verdict = handle.local_change(Change::Remove { index }).await?;
            info!(?verdict, "annotation removed");
        }
        Step::ClearOverride { index } => {
            let cleared = handle.clear_override(index).await?;
            info!(index, cleared = cleared.is_some(), "override cleared");
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
    }
    Ok(())
}
