//! Async tick loop around a [`SessionOrchestrator`].

use chrono::Utc;
use ft_core::{SeriesExport, SessionState, SessionSummary, Snapshot};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::error::SessionError;
use crate::ingest::Ingestor;
use crate::orchestrator::SessionOrchestrator;

/// Snapshots buffered per subscriber before slow subscribers start lagging.
const SNAPSHOT_BUFFER: usize = 64;

/// What a finished session leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub summary: SessionSummary,
    pub timeline: Vec<SeriesExport>,
}

/// Handle to a session running on the tokio runtime.
///
/// Dropping the handle stops the session at the next tick boundary.
pub struct SessionHandle {
    ingestor: Ingestor,
    latest: watch::Receiver<Option<Snapshot>>,
    snapshots: broadcast::Sender<Snapshot>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// A producer handle for the session's queue.
    pub fn ingestor(&self) -> Ingestor {
        self.ingestor.clone()
    }

    /// Receiver that always holds the most recent snapshot.
    pub fn latest(&self) -> watch::Receiver<Option<Snapshot>> {
        self.latest.clone()
    }

    /// Stream of every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Whether the tick loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the loop to stop after the current tick and waits for the summary.
    pub async fn stop(mut self) -> Result<SessionOutcome, SessionError> {
        if let Some(stop) = self.stop.take() {
            // The loop may already have ended on its own.
            let _ = stop.send(());
        }
        self.join().await
    }

    /// Waits for the session to end on its own (inactivity timeout).
    pub async fn join(self) -> Result<SessionOutcome, SessionError> {
        // Keep the stop sender alive so waiting doesn't trigger a stop.
        let Self { task, stop, .. } = self;
        let outcome = task.await.map_err(|err| SessionError::Task(err.to_string()));
        drop(stop);
        outcome
    }
}

/// Spawns the tick loop for `orchestrator` on the current runtime.
pub fn spawn(orchestrator: SessionOrchestrator) -> SessionHandle {
    let ingestor = orchestrator.ingestor();
    let (latest_tx, latest) = watch::channel(None);
    let (snapshots, _) = broadcast::channel(SNAPSHOT_BUFFER);
    let (stop_tx, stop_rx) = oneshot::channel();

    let task = tokio::spawn(run(orchestrator, latest_tx, snapshots.clone(), stop_rx));

    SessionHandle {
        ingestor,
        latest,
        snapshots,
        stop: Some(stop_tx),
        task,
    }
}

async fn run(
    mut orchestrator: SessionOrchestrator,
    latest: watch::Sender<Option<Snapshot>>,
    snapshots: broadcast::Sender<Snapshot>,
    mut stop: oneshot::Receiver<()>,
) -> SessionOutcome {
    let period = orchestrator
        .config()
        .tick_interval()
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        session_id = %orchestrator.session_id(),
        tick_ms = orchestrator.config().tick_interval_ms,
        "session loop started"
    );

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                match orchestrator.tick(Utc::now()) {
                    Ok(snapshot) => {
                        let ended = snapshot.state == SessionState::Ended;
                        // No subscribers is fine.
                        let _ = snapshots.send(snapshot.clone());
                        latest.send_replace(Some(snapshot));
                        if ended {
                            break;
                        }
                    }
                    Err(err) => {
                        error!(session_id = %orchestrator.session_id(), error = %err, "tick failed");
                        break;
                    }
                }
            }
        }
    }

    let summary = orchestrator.stop(Utc::now());
    info!(
        session_id = %summary.session_id,
        entities = summary.entities.len(),
        "session loop stopped"
    );
    SessionOutcome {
        summary,
        timeline: orchestrator.timeline_export(),
    }
}
