//! Request and response bodies for the task endpoints
//!
//! A submission names its kind and carries the kind-specific payload:
//!
//! ```json
//! {
//!   "kind": "gallery-search",
//!   "name": "cats",
//!   "payload": { "keyword": "cats", "maxPages": 3 }
//! }
//! ```
//!
//! Task snapshots are returned as-is (see [`TaskSnapshot`](crate::tasks::TaskSnapshot)).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::MetricsSnapshot;
use crate::tasks::TaskId;

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmitResponse {
    pub id: TaskId,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClearResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub tasks: usize,
    pub subscribers: usize,
    pub metrics: MetricsSnapshot,
}
