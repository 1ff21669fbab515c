use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::messaging::BroadcastSink;
use crate::tasks::TaskService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: TaskService,
    pub events: BroadcastSink,
    /// Cancelled on server shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, service: TaskService, events: BroadcastSink) -> Self {
        Self {
            config: Arc::new(config),
            service,
            events,
            shutdown: CancellationToken::new(),
        }
    }
}
