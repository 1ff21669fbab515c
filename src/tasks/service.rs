//! Task service facade
//!
//! [`TaskService`] owns the store, the submission queue and the event bus.
//! Every dependency with side effects (clock, network, filesystem, external
//! tools, event sink) is injected through [`TaskServiceBuilder`], so the whole
//! engine runs in tests without a live environment.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broker::{QueueError, SubmissionQueue};
use super::clock::{Clock, SystemClock};
use super::dispatcher::Dispatcher;
use super::events::{EventBus, EventPump};
use super::model::{TaskId, TaskKind, TaskPayload, TaskSnapshot, UnknownKind};
use super::progress::StoreProgress;
use super::store::TaskStore;
use crate::collaborators::{
    ArchiveExtractor, EbookConverter, FileEnumerator, LinkCreator, SevenZipCli, SymlinkCreator,
    WalkDirEnumerator,
};
use crate::config::Config;
use crate::crawler::{
    Crawler, CrawlerSettings, DocumentQuery, FetchError, Fetcher, HtmlQuery, HttpClient,
    HttpConfig,
};
use crate::handlers::{
    Convert7zHandler, CreateShortcutsHandler, GalleryCrawlHandler, GallerySearchHandler,
    HandlerRegistry, PackImagesHandler, RegistryError, TaskHandler, TxtToEpubHandler,
};
use crate::messaging::{BroadcastSink, EventSink};
use crate::observability::{Metrics, MetricsSnapshot};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: TaskKind, reason: String },

    #[error("task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("task service is shutting down")]
    ShuttingDown,
}

impl From<QueueError> for SubmitError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { capacity } => SubmitError::QueueFull { capacity },
            QueueError::Closed => SubmitError::ShuttingDown,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no handler registered for task kinds: {}", join_kinds(.0))]
    MissingHandlers(Vec<TaskKind>),

    #[error("crawler setup failed: {0}")]
    Crawler(#[from] FetchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn join_kinds(kinds: &[TaskKind]) -> String {
    kinds
        .iter()
        .map(TaskKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wires a [`TaskService`] from configuration plus injected collaborators
pub struct TaskServiceBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    document_query: Option<Arc<dyn DocumentQuery>>,
    file_enumerator: Option<Arc<dyn FileEnumerator>>,
    archive_extractor: Option<Arc<dyn ArchiveExtractor>>,
    link_creator: Option<Arc<dyn LinkCreator>>,
    ebook_converter: Option<Arc<dyn EbookConverter>>,
    sink: Option<Arc<dyn EventSink>>,
    overrides: Vec<Arc<dyn TaskHandler>>,
    expected: Vec<TaskKind>,
}

impl TaskServiceBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            clock: None,
            fetcher: None,
            document_query: None,
            file_enumerator: None,
            archive_extractor: None,
            link_creator: None,
            ebook_converter: None,
            sink: None,
            overrides: Vec::new(),
            expected: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn document_query(mut self, query: Arc<dyn DocumentQuery>) -> Self {
        self.document_query = Some(query);
        self
    }

    pub fn file_enumerator(mut self, enumerator: Arc<dyn FileEnumerator>) -> Self {
        self.file_enumerator = Some(enumerator);
        self
    }

    pub fn archive_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.archive_extractor = Some(extractor);
        self
    }

    pub fn link_creator(mut self, links: Arc<dyn LinkCreator>) -> Self {
        self.link_creator = Some(links);
        self
    }

    /// Enables `convert-txt-to-epub`; there is no built-in converter
    pub fn ebook_converter(mut self, converter: Arc<dyn EbookConverter>) -> Self {
        self.ebook_converter = Some(converter);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a handler that replaces the built-in one for its kind
    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.overrides.push(handler);
        self
    }

    /// Fail [`start`](Self::start) unless every listed kind has a handler
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected.extend_from_slice(kinds);
        self
    }

    fn registry(&self) -> Result<HandlerRegistry, BuildError> {
        let enumerator = self
            .file_enumerator
            .clone()
            .unwrap_or_else(|| Arc::new(WalkDirEnumerator));
        let output = &self.config.output;

        let fetcher: Arc<dyn Fetcher> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpClient::new(HttpConfig::from(&self.config.crawler))?),
        };
        let query = self
            .document_query
            .clone()
            .unwrap_or_else(|| Arc::new(HtmlQuery));
        let settings = CrawlerSettings::from_config(&self.config.crawler)?;
        let crawler = Arc::new(Crawler::new(fetcher, query, settings));

        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(CreateShortcutsHandler::new(
            self.link_creator
                .clone()
                .unwrap_or_else(|| Arc::new(SymlinkCreator)),
        )))?;
        registry.register(Arc::new(Convert7zHandler::new(
            self.archive_extractor
                .clone()
                .unwrap_or_else(|| Arc::new(SevenZipCli::new())),
            Arc::clone(&enumerator),
            output.video_extensions.clone(),
        )))?;
        registry.register(Arc::new(PackImagesHandler::new(
            enumerator,
            output.image_extensions.clone(),
        )))?;
        registry.register(Arc::new(GallerySearchHandler::new(Arc::clone(&crawler))))?;
        registry.register(Arc::new(GalleryCrawlHandler::new(crawler)))?;
        if let Some(converter) = &self.ebook_converter {
            registry.register(Arc::new(TxtToEpubHandler::new(Arc::clone(converter))))?;
        }

        for handler in &self.overrides {
            registry.replace(Arc::clone(handler));
        }
        Ok(registry)
    }

    /// Validate the handler set and spawn the dispatcher and event pump
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<(TaskService, ServiceHandle), BuildError> {
        let registry = self.registry()?;
        let missing = registry.missing(&self.expected);
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sink = self.sink.unwrap_or_else(|| {
            Arc::new(BroadcastSink::new(self.config.server.event_buffer))
        });
        let queue_config = &self.config.queue;

        let store = Arc::new(TaskStore::new(clock));
        let (queue, rx) = SubmissionQueue::new(queue_config.capacity);
        let (bus, receiver) = EventBus::channel();
        let metrics = Arc::new(Metrics::new());
        let shutdown = CancellationToken::new();
        let pump_stop = CancellationToken::new();

        let pump = EventPump::new(
            receiver,
            Arc::clone(&store),
            sink,
            queue_config.list_debounce.as_duration(),
            pump_stop.clone(),
        );
        let dispatcher = Dispatcher::new(
            rx,
            Arc::clone(&store),
            registry.clone(),
            bus.clone(),
            Arc::new(StoreProgress::new(Arc::clone(&store), bus.clone())),
            Arc::clone(&metrics),
            queue_config.workers,
            shutdown.clone(),
        );

        let pump = tokio::spawn(pump.run());
        let dispatcher = tokio::spawn(dispatcher.run());
        info!(
            kinds = %join_kinds(&registry.kinds()),
            workers = queue_config.workers,
            capacity = queue.capacity(),
            "Task service started"
        );

        let inner = Arc::new(ServiceInner {
            store,
            queue,
            bus,
            metrics,
            shutdown,
        });
        let handle = ServiceHandle {
            inner: Arc::clone(&inner),
            dispatcher,
            pump,
            pump_stop,
        };
        Ok((TaskService { inner }, handle))
    }
}

struct ServiceInner {
    store: Arc<TaskStore>,
    queue: SubmissionQueue,
    bus: EventBus,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

/// Cheap-to-clone handle for submitting and observing tasks
#[derive(Clone)]
pub struct TaskService {
    inner: Arc<ServiceInner>,
}

impl TaskService {
    pub fn builder(config: &Config) -> TaskServiceBuilder {
        TaskServiceBuilder::new(config)
    }

    /// Record a pending task and queue it; returns without waiting for execution
    pub fn submit(&self, payload: TaskPayload, name: impl Into<String>) -> Result<TaskId, SubmitError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let kind = payload.kind();
        let mut name: String = name.into();
        if name.trim().is_empty() {
            name = kind.to_string();
        }

        let snapshot = inner
            .store
            .insert_with(payload, name, |id| inner.queue.push(id))
            .inspect_err(|e| {
                inner.metrics.task_rejected();
                warn!(%kind, error = %e, "Submission rejected");
            })?;

        inner.metrics.task_submitted();
        info!(task_id = %snapshot.id, %kind, name = %snapshot.name, "Task submitted");
        let id = snapshot.id;
        inner.bus.task_updated(snapshot);
        inner.bus.list_changed();
        Ok(id)
    }

    /// Submit from an untyped kind tag and JSON payload
    ///
    /// Unknown tags and malformed payloads are rejected before any record is
    /// created.
    pub fn submit_raw(
        &self,
        kind: &str,
        payload: serde_json::Value,
        name: impl Into<String>,
    ) -> Result<TaskId, SubmitError> {
        let kind: TaskKind = kind.parse()?;
        let payload =
            TaskPayload::from_parts(kind, payload).map_err(|e| SubmitError::InvalidPayload {
                kind,
                reason: e.to_string(),
            })?;
        self.submit(payload, name)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.inner.store.get(id)
    }

    /// Every task, newest first
    pub fn list_all(&self) -> Vec<TaskSnapshot> {
        self.inner.store.list()
    }

    /// Cancel a pending or running task
    ///
    /// Returns whether this call changed the task. Terminal and unknown ids are
    /// left alone; a list broadcast is requested either way.
    pub fn cancel(&self, id: TaskId) -> bool {
        let inner = &self.inner;
        let changed = match inner.store.cancel(id) {
            Some(snapshot) => {
                inner.metrics.task_cancelled();
                info!(task_id = %id, "Task cancellation requested");
                inner.bus.task_updated(snapshot);
                true
            }
            None => {
                debug!(task_id = %id, "Cancel ignored, task not active");
                false
            }
        };
        inner.bus.list_changed();
        changed
    }

    /// Drop every completed, failed and cancelled task; returns how many went
    pub fn clear_completed(&self) -> usize {
        let removed = self.inner.store.clear_terminal();
        debug!(removed, "Cleared finished tasks");
        self.inner.bus.list_changed();
        removed
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// Owns the background tasks spawned by [`TaskServiceBuilder::start`]
pub struct ServiceHandle {
    inner: Arc<ServiceInner>,
    dispatcher: JoinHandle<()>,
    pump: JoinHandle<()>,
    pump_stop: CancellationToken,
}

impl ServiceHandle {
    /// Stop accepting work, cancel active tasks and wait for the background
    /// tasks to finish
    pub async fn shutdown(self) {
        info!("Shutting down task service");
        self.inner.shutdown.cancel();

        let cancelled = self.inner.store.close();
        for _ in 0..cancelled {
            self.inner.metrics.task_cancelled();
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled active tasks");
        }
        self.inner.bus.list_changed();

        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Dispatcher exited abnormally");
        }

        // The pump goes last so the final statuses still reach the sink.
        self.pump_stop.cancel();
        if let Err(e) = self.pump.await {
            warn!(error = %e, "Event pump exited abnormally");
        }
        info!("Task service stopped");
    }

    /// Shutdown with an upper bound on the wait
    pub async fn shutdown_timeout(self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.shutdown()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::crawler::FetchError;
    use crate::handlers::{HandlerError, TaskContext};
    use crate::messaging::MemorySink;
    use crate::tasks::events::TaskEvent;
    use crate::tasks::model::{
        FolderInfo, PackImagesParams, TaskOutput, TaskResult, TaskStatus,
    };

    /// Fetcher for tests that never touch the network
    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn get(&self, url: &str, _referer: Option<&str>) -> crate::crawler::FetchResult<Bytes> {
            Err(FetchError::Request(format!("offline: {}", url)))
        }
    }

    /// Ten units of work, checking the token before each
    struct Steps {
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for Steps {
        fn kind(&self) -> TaskKind {
            TaskKind::PackImages
        }

        async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let mut result = TaskResult::default();
            for i in 0..10 {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                result.record_success();
                ctx.progress.report(i + 1, 10);
            }
            Ok(result.into())
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.queue.list_debounce = crate::config::HumanDuration::from_millis(5);
        config
    }

    fn builder(config: &Config) -> TaskServiceBuilder {
        TaskService::builder(config).fetcher(Arc::new(Offline))
    }

    fn pack_payload(dir: &TempDir) -> TaskPayload {
        TaskPayload::PackImages(PackImagesParams {
            folders: vec![FolderInfo {
                name: "empty".to_string(),
                path: dir.path().to_string_lossy().into_owned(),
                image_count: 0,
                total_size: 0,
            }],
            target_path: dir.path().join("out").to_string_lossy().into_owned(),
            compression_level: None,
        })
    }

    async fn wait_for<F>(service: &TaskService, id: TaskId, done: F) -> TaskSnapshot
    where
        F: Fn(&TaskSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = service.get(id).filter(|t| done(t)) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_pack_images_without_images_completes_with_failure() {
        let dir = TempDir::new().unwrap();
        let (service, handle) = builder(&config()).start().unwrap();

        let id = service.submit(pack_payload(&dir), "pack").unwrap();
        let task = wait_for(&service, id, |t| t.status.is_terminal()).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let Some(TaskOutput::Batch(result)) = task.result else {
            panic!("expected a batch result, got {:?}", task.result);
        };
        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].error, "No images found");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_mid_execution_ends_cancelled() {
        let started = Arc::new(AtomicUsize::new(0));
        let (service, handle) = builder(&config())
            .handler(Arc::new(Steps {
                started: Arc::clone(&started),
            }))
            .start()
            .unwrap();
        let dir = TempDir::new().unwrap();

        let id = service.submit(pack_payload(&dir), "steps").unwrap();
        wait_for(&service, id, |t| t.progress >= 20).await;

        assert!(service.cancel(id));
        assert!(!service.cancel(id));
        let task = wait_for(&service, id, |t| t.status.is_terminal()).await;
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.progress >= 20);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert_eq!(service.metrics().tasks_cancelled, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_record() {
        let mut config = config();
        config.queue.capacity = 1;
        config.queue.workers = 1;
        let started = Arc::new(AtomicUsize::new(0));
        let (service, handle) = builder(&config)
            .handler(Arc::new(Steps {
                started: Arc::clone(&started),
            }))
            .start()
            .unwrap();
        let dir = TempDir::new().unwrap();

        let first = service.submit(pack_payload(&dir), "a").unwrap();
        wait_for(&service, first, |t| t.status == TaskStatus::Running).await;

        // One id may sit in the dispatcher waiting for the worker, one in the buffer.
        let mut accepted = 1;
        let mut rejection = None;
        for _ in 0..4 {
            match service.submit(pack_payload(&dir), "more") {
                Ok(_) => accepted += 1,
                Err(e) => {
                    rejection = Some(e);
                    break;
                }
            }
        }

        assert!(matches!(rejection, Some(SubmitError::QueueFull { capacity: 1 })));
        assert!(accepted <= 3);
        assert_eq!(service.list_all().len(), accepted);
        assert_eq!(service.metrics().tasks_rejected, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_raw_rejects_unknown_kind_and_bad_payload() {
        let (service, handle) = builder(&config()).start().unwrap();

        let err = service.submit_raw("download-everything", json!({}), "x").unwrap_err();
        assert_eq!(err.to_string(), "unknown task kind: download-everything");

        let err = service
            .submit_raw("pack-images", json!({"folders": "nope"}), "x")
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::InvalidPayload {
                kind: TaskKind::PackImages,
                ..
            }
        ));
        assert!(service.list_all().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_epub_without_converter_fails_task() {
        let (service, handle) = builder(&config()).start().unwrap();

        let id = service
            .submit_raw(
                "convert-txt-to-epub",
                json!({"files": [], "outputPath": "/tmp"}),
                "",
            )
            .unwrap();
        let task = wait_for(&service, id, |t| t.status.is_terminal()).await;

        assert_eq!(task.name, "convert-txt-to-epub");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("no handler registered for task kind: convert-txt-to-epub")
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_expect_kinds_reports_missing_handlers() {
        let result = builder(&config())
            .expect_kinds(&TaskKind::ALL)
            .start();

        match result {
            Err(BuildError::MissingHandlers(kinds)) => {
                assert_eq!(kinds, vec![TaskKind::ConvertTxtToEpub]);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected missing handlers"),
        }
    }

    #[tokio::test]
    async fn test_clear_completed_keeps_active_tasks() {
        let mut config = config();
        config.queue.workers = 1;
        let started = Arc::new(AtomicUsize::new(0));
        let (service, handle) = builder(&config)
            .handler(Arc::new(Steps {
                started: Arc::clone(&started),
            }))
            .start()
            .unwrap();
        let dir = TempDir::new().unwrap();

        let running = service.submit(pack_payload(&dir), "running").unwrap();
        let pending = service.submit(pack_payload(&dir), "pending").unwrap();
        let cancelled = service.submit(pack_payload(&dir), "cancelled").unwrap();
        wait_for(&service, running, |t| t.status == TaskStatus::Running).await;
        service.cancel(cancelled);

        assert_eq!(service.clear_completed(), 1);
        assert!(service.get(cancelled).is_none());
        assert_eq!(service.get(running).unwrap().status, TaskStatus::Running);
        assert_eq!(service.get(pending).unwrap().status, TaskStatus::Pending);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects_new_work() {
        let sink = Arc::new(MemorySink::new());
        let started = Arc::new(AtomicUsize::new(0));
        let (service, handle) = builder(&config())
            .sink(sink.clone())
            .handler(Arc::new(Steps {
                started: Arc::clone(&started),
            }))
            .start()
            .unwrap();
        let dir = TempDir::new().unwrap();

        let id = service.submit(pack_payload(&dir), "long").unwrap();
        wait_for(&service, id, |t| t.status == TaskStatus::Running).await;
        handle.shutdown().await;

        assert_eq!(service.get(id).unwrap().status, TaskStatus::Cancelled);
        assert!(matches!(
            service.submit(pack_payload(&dir), "late"),
            Err(SubmitError::ShuttingDown)
        ));

        // The last delivered list reflects the final statuses.
        let last_list = sink
            .events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                TaskEvent::TaskListUpdate(tasks) => Some(tasks),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_list.len(), 1);
        assert_eq!(last_list[0].status, TaskStatus::Cancelled);
    }
}
