//! Task engine
//!
//! Submissions become [`TaskSnapshot`](model::TaskSnapshot) records in the
//! [`TaskStore`](store::TaskStore), their ids flow through a bounded
//! [`SubmissionQueue`](broker::SubmissionQueue) to the
//! [`Dispatcher`](dispatcher::Dispatcher), and every state change is routed
//! through the [`EventBus`](events::EventBus) to one event sink.
//!
//! ## Example
//!
//! ```rust,ignore
//! let (service, handle) = TaskService::builder(&config).start()?;
//! let id = service.submit_raw("gallery-search", json!({"keyword": "cats"}), "cats")?;
//! println!("{:?}", service.get(id));
//! handle.shutdown().await;
//! ```

pub mod broker;
pub mod clock;
pub mod dispatcher;
pub mod events;
pub mod model;
pub mod progress;
pub mod service;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use events::{ProgressEvent, ProgressStage, TaskEvent};
pub use model::{TaskId, TaskKind, TaskOutput, TaskPayload, TaskSnapshot, TaskStatus};
pub use service::{BuildError, ServiceHandle, SubmitError, TaskService, TaskServiceBuilder};
