//! Single-consumer dispatcher
//!
//! Pulls ids off the submission queue one at a time and launches each run on
//! its own tokio task. A semaphore of `workers` permits bounds how many runs
//! execute at once; a task waiting for a permit stays `pending`.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::EventBus;
use super::model::{TaskId, TaskSnapshot, TaskStatus};
use super::progress::{ProgressReporter, ProgressSink};
use super::store::{ClaimedTask, RunOutcome, TaskStore};
use crate::handlers::{HandlerRegistry, TaskContext};
use crate::observability::Metrics;

pub struct Dispatcher {
    rx: mpsc::Receiver<TaskId>,
    store: Arc<TaskStore>,
    registry: HandlerRegistry,
    bus: EventBus,
    progress: Arc<dyn ProgressSink>,
    metrics: Arc<Metrics>,
    workers: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<TaskId>,
        store: Arc<TaskStore>,
        registry: HandlerRegistry,
        bus: EventBus,
        progress: Arc<dyn ProgressSink>,
        metrics: Arc<Metrics>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            store,
            registry,
            bus,
            progress,
            metrics,
            workers: workers.max(1),
            shutdown,
        }
    }

    /// Consume the queue until shutdown or until every producer is gone,
    /// then wait for in-flight runs
    pub async fn run(mut self) {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut runs = JoinSet::new();
        info!(workers = self.workers, "Dispatcher started");

        loop {
            let id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Task run aborted");
                    }
                    continue;
                }
                id = self.rx.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // A task cancelled while queued is skipped silently.
            let Some(claimed) = self.store.claim(id) else {
                debug!(task_id = %id, "Task no longer pending, skipping");
                continue;
            };
            self.bus.task_updated(claimed.snapshot.clone());

            let run = TaskRun {
                store: Arc::clone(&self.store),
                registry: self.registry.clone(),
                bus: self.bus.clone(),
                progress: Arc::clone(&self.progress),
                metrics: Arc::clone(&self.metrics),
            };
            runs.spawn(async move {
                let _permit = permit;
                run.execute(claimed).await;
            });
        }

        self.rx.close();
        if !runs.is_empty() {
            info!(in_flight = runs.len(), "Waiting for running tasks");
        }
        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task run aborted");
            }
        }
        info!("Dispatcher stopped");
    }
}

/// Shared state one run needs after it leaves the dispatcher loop
struct TaskRun {
    store: Arc<TaskStore>,
    registry: HandlerRegistry,
    bus: EventBus,
    progress: Arc<dyn ProgressSink>,
    metrics: Arc<Metrics>,
}

impl TaskRun {
    async fn execute(self, claimed: ClaimedTask) {
        let ClaimedTask { snapshot, token } = claimed;
        let id = snapshot.id;
        let kind = snapshot.kind();
        info!(task_id = %id, %kind, name = %snapshot.name, "Task started");

        let outcome = match self.registry.get(kind) {
            Ok(handler) => {
                let ctx = TaskContext {
                    id,
                    payload: snapshot.payload,
                    cancel: token.clone(),
                    progress: ProgressReporter::new(id, Arc::clone(&self.progress)),
                };
                // Run on its own task so a panicking handler fails only this task.
                match tokio::spawn(async move { handler.execute(ctx).await }).await {
                    Ok(Ok(output)) => RunOutcome::Succeeded(output),
                    Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                    Err(e) if e.is_panic() => {
                        error!(task_id = %id, %kind, "Handler panicked");
                        RunOutcome::Failed("handler panicked".to_string())
                    }
                    Err(e) => RunOutcome::Failed(e.to_string()),
                }
            }
            Err(e) => {
                warn!(task_id = %id, %kind, error = %e, "No handler for task");
                RunOutcome::Failed(e.to_string())
            }
        };

        let Some(finished) = self.store.finalize(id, &token, outcome) else {
            warn!(task_id = %id, "Task vanished before finalization");
            return;
        };
        self.record(&finished);
        self.bus.task_updated(finished);
        self.bus.list_changed();
    }

    fn record(&self, snapshot: &TaskSnapshot) {
        match snapshot.status {
            TaskStatus::Completed => {
                self.metrics.task_completed();
                info!(task_id = %snapshot.id, "Task completed");
            }
            TaskStatus::Failed => {
                self.metrics.task_failed();
                warn!(
                    task_id = %snapshot.id,
                    error = snapshot.error.as_deref().unwrap_or_default(),
                    "Task failed"
                );
            }
            // Counted where the cancel was requested.
            TaskStatus::Cancelled => info!(task_id = %snapshot.id, "Task cancelled"),
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
}
