//! In-process task store
//!
//! All task records live in one map behind a single mutex. The lock is only
//! held for short, non-blocking sections; callers receive owned
//! [`TaskSnapshot`] copies and never a reference into the map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broker::QueueError;
use super::clock::Clock;
use super::model::{TaskId, TaskOutput, TaskPayload, TaskSnapshot, TaskStatus};

/// Mutable record of one task
#[derive(Debug)]
struct TaskRecord {
    id: TaskId,
    name: String,
    status: TaskStatus,
    payload: TaskPayload,
    progress: u8,
    result: Option<TaskOutput>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    /// Present only while the task executes
    cancel: Option<CancellationToken>,
}

impl TaskRecord {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            payload: self.payload.clone(),
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<TaskId, TaskRecord>,
    last_id: u64,
    closed: bool,
}

/// Work claimed by the dispatcher for one execution
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub snapshot: TaskSnapshot,
    pub token: CancellationToken,
}

/// How a handler run ended, as seen by finalization
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(TaskOutput),
    Failed(String),
}

pub struct TaskStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a pending record and hand its id to `enqueue` under the lock
    ///
    /// Ids are only consumed when `enqueue` succeeds, so queue order always
    /// matches id order and a rejected submission leaves no record behind.
    pub fn insert_with<F>(
        &self,
        payload: TaskPayload,
        name: String,
        enqueue: F,
    ) -> Result<TaskSnapshot, QueueError>
    where
        F: FnOnce(TaskId) -> Result<(), QueueError>,
    {
        let mut state = self.state();
        if state.closed {
            return Err(QueueError::Closed);
        }
        let id = TaskId(state.last_id + 1);
        enqueue(id)?;
        state.last_id = id.0;

        let record = TaskRecord {
            id,
            name,
            status: TaskStatus::Pending,
            payload,
            progress: 0,
            result: None,
            error: None,
            created_at: self.clock.now(),
            cancel: None,
        };
        let snapshot = record.snapshot();
        state.records.insert(id, record);

        debug!(task_id = %id, kind = %snapshot.kind(), "Task recorded");
        Ok(snapshot)
    }

    /// Transition a pending task to running and issue its cancellation token
    ///
    /// Returns `None` when the task is gone or no longer pending, which is how
    /// a task cancelled while queued gets skipped.
    pub fn claim(&self, id: TaskId) -> Option<ClaimedTask> {
        let mut state = self.state();
        let record = state.records.get_mut(&id)?;
        if record.status != TaskStatus::Pending {
            return None;
        }

        let token = CancellationToken::new();
        record.status = TaskStatus::Running;
        record.cancel = Some(token.clone());

        Some(ClaimedTask {
            snapshot: record.snapshot(),
            token,
        })
    }

    /// Cancel a pending or running task; returns the new snapshot if anything changed
    pub fn cancel(&self, id: TaskId) -> Option<TaskSnapshot> {
        let mut state = self.state();
        let record = state.records.get_mut(&id)?;
        if !record.status.is_active() {
            return None;
        }

        record.status = TaskStatus::Cancelled;
        if let Some(token) = record.cancel.take() {
            token.cancel();
        }
        Some(record.snapshot())
    }

    /// Refuse new records and cancel every active task (used on shutdown)
    ///
    /// Both happen under one lock, so a submission racing with shutdown is
    /// either cancelled here or rejected by [`TaskStore::insert_with`].
    pub fn close(&self) -> usize {
        let mut state = self.state();
        state.closed = true;
        let mut cancelled = 0;
        for record in state.records.values_mut() {
            if record.status.is_active() {
                record.status = TaskStatus::Cancelled;
                if let Some(token) = record.cancel.take() {
                    token.cancel();
                }
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Record handler progress; ignored unless the task is running
    ///
    /// Stored progress never decreases.
    pub fn set_progress(&self, id: TaskId, done: u64, total: u64) -> Option<TaskSnapshot> {
        let mut state = self.state();
        let record = state.records.get_mut(&id)?;
        if record.status != TaskStatus::Running {
            return None;
        }

        record.progress = record.progress.max(percent(done, total));
        Some(record.snapshot())
    }

    /// Apply the final status after a handler returned
    ///
    /// A signalled token or an already-cancelled status wins over any result.
    pub fn finalize(
        &self,
        id: TaskId,
        token: &CancellationToken,
        outcome: RunOutcome,
    ) -> Option<TaskSnapshot> {
        let mut state = self.state();
        let record = state.records.get_mut(&id)?;

        if token.is_cancelled() || record.status == TaskStatus::Cancelled {
            record.status = TaskStatus::Cancelled;
        } else {
            match outcome {
                RunOutcome::Failed(message) => {
                    record.status = TaskStatus::Failed;
                    record.error = Some(message);
                }
                RunOutcome::Succeeded(output) => {
                    record.status = TaskStatus::Completed;
                    record.result = Some(output);
                    record.progress = 100;
                }
            }
        }
        record.cancel = None;
        Some(record.snapshot())
    }

    /// Remove every terminal record; active tasks are untouched
    pub fn clear_terminal(&self) -> usize {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|_, record| !record.status.is_terminal());
        before - state.records.len()
    }

    pub fn get(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.state().records.get(&id).map(TaskRecord::snapshot)
    }

    /// All tasks, newest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<TaskSnapshot> = self
            .state()
            .records
            .values()
            .map(TaskRecord::snapshot)
            .collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        tasks
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `floor(done / total * 100)` clamped to `0..=100`; an empty total reports 0
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = done.saturating_mul(100) / total;
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::clock::FixedClock;
    use crate::tasks::model::{GallerySearchParams, SearchResult};

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(FixedClock(Utc::now())))
    }

    fn payload() -> TaskPayload {
        TaskPayload::GallerySearch(GallerySearchParams {
            keyword: "cats".to_string(),
            max_pages: None,
        })
    }

    fn insert(store: &TaskStore) -> TaskId {
        store
            .insert_with(payload(), "search".to_string(), |_| Ok(()))
            .unwrap()
            .id
    }

    #[test]
    fn test_ids_are_monotonic() {
        let store = store();
        let ids: Vec<TaskId> = (0..3).map(|_| insert(&store)).collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(2), TaskId(3)]);
    }

    #[test]
    fn test_rejected_enqueue_leaves_no_record() {
        let store = store();
        let result = store.insert_with(payload(), "x".to_string(), |_| {
            Err(QueueError::Full { capacity: 1 })
        });
        assert!(result.is_err());
        assert!(store.is_empty());

        // The id was not consumed
        assert_eq!(insert(&store), TaskId(1));
    }

    #[test]
    fn test_list_is_sorted_newest_first() {
        let store = store();
        for _ in 0..5 {
            insert(&store);
        }
        let ids: Vec<u64> = store.list().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_claim_only_once() {
        let store = store();
        let id = insert(&store);

        let claimed = store.claim(id).unwrap();
        assert_eq!(claimed.snapshot.status, TaskStatus::Running);
        assert!(store.claim(id).is_none());
    }

    #[test]
    fn test_cancelled_while_pending_is_never_claimed() {
        let store = store();
        let id = insert(&store);

        assert!(store.cancel(id).is_some());
        assert!(store.claim(id).is_none());
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let store = store();
        let id = insert(&store);
        let claimed = store.claim(id).unwrap();

        assert!(store.cancel(id).is_some());
        assert!(store.cancel(id).is_none());
        assert!(claimed.token.is_cancelled());
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_unknown_id() {
        assert!(store().cancel(TaskId(42)).is_none());
    }

    #[test]
    fn test_progress_monotonic_and_running_only() {
        let store = store();
        let id = insert(&store);
        assert!(store.set_progress(id, 1, 2).is_none());

        store.claim(id).unwrap();
        assert_eq!(store.set_progress(id, 1, 2).unwrap().progress, 50);
        assert_eq!(store.set_progress(id, 1, 4).unwrap().progress, 50);
        assert_eq!(store.set_progress(id, 3, 3).unwrap().progress, 100);
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(5, 3), 100);
    }

    #[test]
    fn test_finalize_success_forces_full_progress() {
        let store = store();
        let id = insert(&store);
        let claimed = store.claim(id).unwrap();

        let snap = store
            .finalize(
                id,
                &claimed.token,
                RunOutcome::Succeeded(SearchResult::default().into()),
            )
            .unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert!(snap.result.is_some());
    }

    #[test]
    fn test_finalize_failure_records_message() {
        let store = store();
        let id = insert(&store);
        let claimed = store.claim(id).unwrap();

        let snap = store
            .finalize(id, &claimed.token, RunOutcome::Failed("boom".to_string()))
            .unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cancellation_wins_over_result() {
        let store = store();
        let id = insert(&store);
        let claimed = store.claim(id).unwrap();
        store.set_progress(id, 3, 10);
        store.cancel(id);

        let snap = store
            .finalize(
                id,
                &claimed.token,
                RunOutcome::Succeeded(SearchResult::default().into()),
            )
            .unwrap();
        assert_eq!(snap.status, TaskStatus::Cancelled);
        assert!(snap.result.is_none());
        assert_eq!(snap.progress, 30);
    }

    #[test]
    fn test_signalled_token_wins_over_error() {
        let store = store();
        let id = insert(&store);
        let claimed = store.claim(id).unwrap();
        claimed.token.cancel();

        let snap = store
            .finalize(id, &claimed.token, RunOutcome::Failed("late".to_string()))
            .unwrap();
        assert_eq!(snap.status, TaskStatus::Cancelled);
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_clear_terminal_keeps_active() {
        let store = store();
        let done = insert(&store);
        let running = insert(&store);
        let pending = insert(&store);
        let cancelled = insert(&store);

        let claimed = store.claim(done).unwrap();
        store.finalize(
            done,
            &claimed.token,
            RunOutcome::Succeeded(SearchResult::default().into()),
        );
        store.claim(running).unwrap();
        store.cancel(cancelled);

        assert_eq!(store.clear_terminal(), 2);
        assert!(store.get(done).is_none());
        assert!(store.get(cancelled).is_none());
        assert_eq!(store.get(running).unwrap().status, TaskStatus::Running);
        assert_eq!(store.get(pending).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_close_signals_running_tokens() {
        let store = store();
        let a = insert(&store);
        let _b = insert(&store);
        let claimed = store.claim(a).unwrap();

        assert_eq!(store.close(), 2);
        assert!(claimed.token.is_cancelled());
        assert!(store.list().iter().all(|t| t.status == TaskStatus::Cancelled));
    }

    #[test]
    fn test_insert_after_close_is_rejected() {
        let store = store();
        store.close();

        let mut enqueued = false;
        let result = store.insert_with(payload(), "late".to_string(), |_| {
            enqueued = true;
            Ok(())
        });

        assert_eq!(result.unwrap_err(), QueueError::Closed);
        assert!(!enqueued);
        assert!(store.list().is_empty());
    }
}
