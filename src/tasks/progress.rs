//! Progress reporting handed to handlers

use std::sync::{Arc, Mutex, PoisonError};

use super::events::{EventBus, ProgressEvent, ProgressStage};
use super::model::TaskId;
use super::store::TaskStore;

/// Destination for handler progress
pub trait ProgressSink: Send + Sync {
    /// Overall completion as `done` of `total` units
    fn task_progress(&self, id: TaskId, done: u64, total: u64);

    /// Kind-specific progress detail
    fn stage_progress(&self, event: ProgressEvent);
}

/// Updates the store and publishes on the bus
pub struct StoreProgress {
    store: Arc<TaskStore>,
    bus: EventBus,
}

impl StoreProgress {
    pub fn new(store: Arc<TaskStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }
}

impl ProgressSink for StoreProgress {
    fn task_progress(&self, id: TaskId, done: u64, total: u64) {
        if let Some(snapshot) = self.store.set_progress(id, done, total) {
            self.bus.task_updated(snapshot);
        }
    }

    fn stage_progress(&self, event: ProgressEvent) {
        self.bus.progress(event);
    }
}

/// Per-task handle used by handlers to report progress
#[derive(Clone)]
pub struct ProgressReporter {
    id: TaskId,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(id: TaskId, sink: Arc<dyn ProgressSink>) -> Self {
        Self { id, sink }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn report(&self, done: usize, total: usize) {
        self.sink.task_progress(self.id, done as u64, total as u64);
    }

    pub fn stage(&self, stage: ProgressStage, current: usize, total: usize, label: impl Into<String>) {
        self.sink.stage_progress(ProgressEvent {
            task_id: self.id,
            current: current as u64,
            total: total as u64,
            label: label.into(),
            stage,
        });
    }
}

/// In-memory progress log; for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingProgress {
    reports: Mutex<Vec<(u64, u64)>>,
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reporter(self: &Arc<Self>, id: TaskId) -> ProgressReporter {
        ProgressReporter::new(id, Arc::clone(self) as Arc<dyn ProgressSink>)
    }

    pub fn reports(&self) -> Vec<(u64, u64)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_for(&self, stage: ProgressStage) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.stage == stage)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn task_progress(&self, _id: TaskId, done: u64, total: u64) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((done, total));
    }

    fn stage_progress(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
