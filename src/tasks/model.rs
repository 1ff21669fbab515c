//! Task records, snapshots and the typed payload union.
//!
//! Every submitted job is a [`TaskPayload`] variant. The variant tag doubles as
//! the task kind, so dispatch selects both the payload type and the handler
//! from the same value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic task identifier assigned at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status
///
/// Transitions only move forward: `Pending -> Running -> {Completed, Failed, Cancelled}`,
/// plus `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug, Error)]
#[error("unknown task kind: {0}")]
pub struct UnknownKind(pub String);

/// Kind tag, one per [`TaskPayload`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    CreateShortcuts,
    #[serde(rename = "convert-7z-to-zip")]
    Convert7zToZip,
    PackImages,
    ConvertTxtToEpub,
    GallerySearch,
    GalleryCrawl,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::CreateShortcuts,
        TaskKind::Convert7zToZip,
        TaskKind::PackImages,
        TaskKind::ConvertTxtToEpub,
        TaskKind::GallerySearch,
        TaskKind::GalleryCrawl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CreateShortcuts => "create-shortcuts",
            TaskKind::Convert7zToZip => "convert-7z-to-zip",
            TaskKind::PackImages => "pack-images",
            TaskKind::ConvertTxtToEpub => "convert-txt-to-epub",
            TaskKind::GallerySearch => "gallery-search",
            TaskKind::GalleryCrawl => "gallery-crawl",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Plain file reference produced by the filesystem enumerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    pub parent_folder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamingMode {
    #[default]
    Original,
    Folder,
    FolderOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShortcutsParams {
    pub videos: Vec<VideoFile>,
    pub target_path: String,
    #[serde(default)]
    pub naming_mode: NamingMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Convert7zParams {
    pub files: Vec<FileInfo>,
    pub video_output_path: String,
    #[serde(default = "default_true")]
    pub keep_original: bool,
    #[serde(default)]
    pub compression_level: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackImagesParams {
    pub folders: Vec<FolderInfo>,
    pub target_path: String,
    #[serde(default)]
    pub compression_level: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpubOptions {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub custom_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertTxtParams {
    pub files: Vec<FileInfo>,
    pub output_path: String,
    #[serde(default)]
    pub options: EpubOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GallerySearchParams {
    pub keyword: String,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryCrawlParams {
    pub galleries: Vec<Gallery>,
    pub output_path: String,
}

/// One discovered content item; `url` is the dedup key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gallery {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub thumbnail: String,
}

fn default_true() -> bool {
    true
}

/// Strongly-typed payload, tagged by task kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum TaskPayload {
    CreateShortcuts(CreateShortcutsParams),
    #[serde(rename = "convert-7z-to-zip")]
    Convert7zToZip(Convert7zParams),
    PackImages(PackImagesParams),
    ConvertTxtToEpub(ConvertTxtParams),
    GallerySearch(GallerySearchParams),
    GalleryCrawl(GalleryCrawlParams),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::CreateShortcuts(_) => TaskKind::CreateShortcuts,
            TaskPayload::Convert7zToZip(_) => TaskKind::Convert7zToZip,
            TaskPayload::PackImages(_) => TaskKind::PackImages,
            TaskPayload::ConvertTxtToEpub(_) => TaskKind::ConvertTxtToEpub,
            TaskPayload::GallerySearch(_) => TaskKind::GallerySearch,
            TaskPayload::GalleryCrawl(_) => TaskKind::GalleryCrawl,
        }
    }

    /// Decode a payload from a kind tag and an untyped JSON body
    pub fn from_parts(kind: TaskKind, payload: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({
            "kind": kind.as_str(),
            "payload": payload,
        }))
    }
}

/// Per-item failure descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery: Option<String>,
    pub error: String,
}

impl ErrorDetail {
    pub fn file(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            gallery: None,
            error: error.into(),
        }
    }

    pub fn gallery(gallery: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: None,
            gallery: Some(gallery.into()),
            error: error.into(),
        }
    }
}

/// Aggregate outcome of a file batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<ErrorDetail>,
}

impl TaskResult {
    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self, detail: ErrorDetail) {
        self.failed += 1;
        self.errors.push(detail);
    }
}

/// Per-gallery packaging metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryReport {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    pub assets_found: usize,
    pub assets_written: usize,
    pub assets_failed: usize,
}

impl GalleryReport {
    pub fn is_partial(&self) -> bool {
        self.assets_written > 0 && self.assets_failed > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub success: usize,
    pub failed: usize,
    pub total_images: usize,
    pub errors: Vec<ErrorDetail>,
    pub galleries: Vec<GalleryReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub success: bool,
    pub galleries: Vec<Gallery>,
    pub pages_loaded: u32,
    pub has_more: bool,
}

/// Result payload recorded on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutput {
    Crawl(CrawlResult),
    Search(SearchResult),
    Batch(TaskResult),
}

impl From<TaskResult> for TaskOutput {
    fn from(value: TaskResult) -> Self {
        TaskOutput::Batch(value)
    }
}

impl From<CrawlResult> for TaskOutput {
    fn from(value: CrawlResult) -> Self {
        TaskOutput::Crawl(value)
    }
}

impl From<SearchResult> for TaskOutput {
    fn from(value: SearchResult) -> Self {
        TaskOutput::Search(value)
    }
}

/// Independent copy of a task record handed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    /// Serialized inline as `kind` + `payload`
    #[serde(flatten)]
    pub payload: TaskPayload,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("format-disk".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_payload_tag_matches_kind_string() {
        let payload = TaskPayload::PackImages(PackImagesParams {
            folders: vec![],
            target_path: "/tmp/out".to_string(),
            compression_level: None,
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "pack-images");
        assert_eq!(value["payload"]["targetPath"], "/tmp/out");
    }

    #[test]
    fn test_from_parts_decodes_camel_case_fields() {
        let payload = TaskPayload::from_parts(
            TaskKind::Convert7zToZip,
            json!({
                "files": [{"name": "a.7z", "path": "/in/a.7z", "size": 10}],
                "videoOutputPath": "/videos"
            }),
        )
        .unwrap();

        match payload {
            TaskPayload::Convert7zToZip(params) => {
                assert_eq!(params.files.len(), 1);
                assert_eq!(params.video_output_path, "/videos");
                assert!(params.keep_original);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_from_parts_rejects_missing_fields() {
        let result = TaskPayload::from_parts(TaskKind::GalleryCrawl, json!({"galleries": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_error_detail_omits_absent_labels() {
        let value = serde_json::to_value(ErrorDetail::file("a.zip", "boom")).unwrap();
        assert_eq!(value, json!({"file": "a.zip", "error": "boom"}));
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot = TaskSnapshot {
            id: TaskId(7),
            name: "Search cats".to_string(),
            status: TaskStatus::Pending,
            payload: TaskPayload::GallerySearch(GallerySearchParams {
                keyword: "cats".to_string(),
                max_pages: Some(2),
            }),
            progress: 0,
            result: None,
            error: None,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["kind"], "gallery-search");
        assert_eq!(value["payload"]["maxPages"], 2);
        assert_eq!(value["createdAt"], 1_700_000_000_123i64);
        assert!(value.get("result").is_none());

        let back: TaskSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
