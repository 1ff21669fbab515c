//! Event routing
//!
//! Every producer (service calls, dispatcher, handlers) writes into one
//! unbounded channel; a single [`EventPump`] drains it and forwards to the
//! configured [`EventSink`]. Delivery order is therefore the order in which
//! messages entered the channel.
//!
//! List broadcasts are coalesced: the first "list changed" signal opens a
//! short window, later signals inside that window are absorbed, and one list
//! snapshot is taken when the window closes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::model::{TaskId, TaskSnapshot};
use super::store::TaskStore;
use crate::messaging::EventSink;

/// Stage label for kind-specific progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Searching,
    Fetching,
    Downloading,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub current: u64,
    pub total: u64,
    pub label: String,
    pub stage: ProgressStage,
}

/// Observable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TaskEvent {
    TaskUpdate(TaskSnapshot),
    TaskListUpdate(Vec<TaskSnapshot>),
    TaskProgress(ProgressEvent),
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::TaskUpdate(_) => "task-update",
            TaskEvent::TaskListUpdate(_) => "task-list-update",
            TaskEvent::TaskProgress(_) => "task-progress",
        }
    }
}

#[derive(Debug)]
enum BusMessage {
    Publish(TaskEvent),
    ListChanged,
}

/// Producer side of the event channel; cheap to clone
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Consumer side, turned into an [`EventPump`]
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl EventBus {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventReceiver { rx })
    }

    pub fn task_updated(&self, snapshot: TaskSnapshot) {
        self.send(BusMessage::Publish(TaskEvent::TaskUpdate(snapshot)));
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.send(BusMessage::Publish(TaskEvent::TaskProgress(event)));
    }

    /// Request a (debounced) full list broadcast
    pub fn list_changed(&self) {
        self.send(BusMessage::ListChanged);
    }

    fn send(&self, message: BusMessage) {
        // The pump is gone only after shutdown; late events are dropped.
        if self.tx.send(message).is_err() {
            debug!("Event pump stopped, dropping event");
        }
    }
}

/// Single consumer that serializes delivery to the sink
pub struct EventPump {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    store: Arc<TaskStore>,
    sink: Arc<dyn EventSink>,
    debounce: Duration,
    shutdown: CancellationToken,
}

impl EventPump {
    pub fn new(
        receiver: EventReceiver,
        store: Arc<TaskStore>,
        sink: Arc<dyn EventSink>,
        debounce: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx: receiver.rx,
            store,
            sink,
            debounce,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut list_due: Option<Instant> = None;

        loop {
            let message = match list_due {
                Some(deadline) => tokio::select! {
                    message = self.rx.recv() => message,
                    _ = tokio::time::sleep_until(deadline) => {
                        list_due = None;
                        self.publish_list().await;
                        continue;
                    }
                    _ = self.shutdown.cancelled() => break,
                },
                None => tokio::select! {
                    message = self.rx.recv() => message,
                    _ = self.shutdown.cancelled() => break,
                },
            };

            match message {
                Some(BusMessage::Publish(event)) => self.deliver(event).await,
                Some(BusMessage::ListChanged) => {
                    if list_due.is_none() {
                        list_due = Some(Instant::now() + self.debounce);
                    }
                }
                None => break,
            }
        }

        // Drain what producers already queued, then emit the final list.
        while let Ok(message) = self.rx.try_recv() {
            if let BusMessage::Publish(event) = message {
                self.deliver(event).await;
            }
        }
        self.publish_list().await;
        debug!("Event pump stopped");
    }

    async fn publish_list(&self) {
        let tasks = self.store.list();
        self.deliver(TaskEvent::TaskListUpdate(tasks)).await;
    }

    async fn deliver(&self, event: TaskEvent) {
        if let Err(e) = self.sink.publish(&event).await {
            warn!(event = event.name(), error = %e, "Failed to deliver event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemorySink;
    use crate::tasks::clock::SystemClock;
    use crate::tasks::model::{GallerySearchParams, TaskPayload};

    fn insert(store: &TaskStore) -> TaskSnapshot {
        store
            .insert_with(
                TaskPayload::GallerySearch(GallerySearchParams {
                    keyword: "k".to_string(),
                    max_pages: None,
                }),
                "t".to_string(),
                |_| Ok(()),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_signals_are_coalesced() {
        let store = Arc::new(TaskStore::new(Arc::new(SystemClock)));
        let sink = Arc::new(MemorySink::new());
        let shutdown = CancellationToken::new();
        let (bus, receiver) = EventBus::channel();
        let pump = EventPump::new(
            receiver,
            Arc::clone(&store),
            sink.clone(),
            Duration::from_millis(50),
            shutdown.clone(),
        );
        let handle = tokio::spawn(pump.run());

        for _ in 0..5 {
            insert(&store);
            bus.list_changed();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let lists: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::TaskListUpdate(tasks) => Some(tasks),
                _ => None,
            })
            .collect();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].len(), 5);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_delivered_in_send_order() {
        let store = Arc::new(TaskStore::new(Arc::new(SystemClock)));
        let sink = Arc::new(MemorySink::new());
        let shutdown = CancellationToken::new();
        let (bus, receiver) = EventBus::channel();
        let snapshot = insert(&store);

        for current in 1..=3 {
            bus.progress(ProgressEvent {
                task_id: snapshot.id,
                current,
                total: 3,
                label: "x".to_string(),
                stage: ProgressStage::Processing,
            });
        }
        bus.task_updated(snapshot.clone());
        drop(bus);

        EventPump::new(receiver, store, sink.clone(), Duration::from_millis(1), shutdown)
            .run()
            .await;

        let names: Vec<&str> = sink.events().iter().map(TaskEvent::name).collect();
        assert_eq!(
            names,
            vec!["task-progress", "task-progress", "task-progress", "task-update", "task-list-update"]
        );
    }
}
