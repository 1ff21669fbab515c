use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP surface
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Events buffered per SSE subscriber before it starts lagging
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_event_buffer() -> usize {
    256
}

/// Dispatcher and submission queue
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum concurrently running tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending submissions buffered ahead of the dispatcher
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Window in which list-changed signals coalesce into one broadcast
    #[serde(default = "default_list_debounce")]
    pub list_debounce: HumanDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_capacity(),
            list_debounce: default_list_debounce(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_capacity() -> usize {
    100
}

fn default_list_debounce() -> HumanDuration {
    HumanDuration::from_millis(50)
}

/// Gallery search and download pipeline
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// `Referer` sent with item pages and asset downloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_page_delay")]
    pub page_delay: HumanDuration,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_asset_bytes")]
    pub max_asset_bytes: ByteSize,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// An item link must contain one of these path fragments
    #[serde(default = "default_item_path_markers")]
    pub item_path_markers: Vec<String>,
    #[serde(default = "default_item_suffix")]
    pub item_suffix: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            referer: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            download_concurrency: default_download_concurrency(),
            page_delay: default_page_delay(),
            max_pages: default_max_pages(),
            max_asset_bytes: default_max_asset_bytes(),
            accept_invalid_certs: false,
            item_path_markers: default_item_path_markers(),
            item_suffix: default_item_suffix(),
        }
    }
}

fn default_base_url() -> String {
    "https://gallery.example.com".to_string()
}

fn default_user_agent() -> String {
    concat!("Mozilla/5.0 (compatible; taskbox/", env!("CARGO_PKG_VERSION"), ")").to_string()
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_download_concurrency() -> usize {
    5
}

fn default_page_delay() -> HumanDuration {
    HumanDuration::from_millis(500)
}

fn default_max_pages() -> u32 {
    10
}

fn default_max_asset_bytes() -> ByteSize {
    ByteSize(50 * 1024 * 1024) // 50 MB
}

fn default_item_path_markers() -> Vec<String> {
    vec!["/gallery/".to_string()]
}

fn default_item_suffix() -> String {
    ".html".to_string()
}

/// File classification for the batch handlers
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }
}

fn default_image_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"]
        .map(String::from)
        .to_vec()
}

fn default_video_extensions() -> Vec<String> {
    [".mp4", ".mkv", ".avi", ".wmv", ".mov", ".flv", ".webm", ".ts"]
        .map(String::from)
        .to_vec()
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
