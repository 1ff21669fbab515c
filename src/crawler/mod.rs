//! Content acquisition pipeline
//!
//! Paginated discovery of items ([`Crawler::search`]) and bounded-parallel
//! download of their assets into one archive per item
//! ([`Crawler::crawl_and_pack`]). Both run inside a dispatched task and
//! honour its cancellation token and progress reporter.

mod document;
mod http;
mod pack;
mod search;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::CrawlerConfig;

pub use document::{DocumentQuery, HtmlQuery, ItemLink};
pub use http::{FetchError, Fetcher, HttpClient, HttpConfig, Result as FetchResult};
pub use pack::{entry_name, sanitize_filename};
pub use search::SearchPage;

/// Pipeline tuning, resolved from [`CrawlerConfig`]
#[derive(Debug, Clone)]
pub struct CrawlerSettings {
    pub base_url: Url,
    pub referer: Option<String>,
    pub download_concurrency: usize,
    pub page_delay: Duration,
    pub max_pages: u32,
    pub max_asset_bytes: u64,
    pub item_path_markers: Vec<String>,
    pub item_suffix: String,
}

impl CrawlerSettings {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        Ok(Self {
            base_url,
            referer: config.referer.clone(),
            download_concurrency: config.download_concurrency.max(1),
            page_delay: config.page_delay.as_duration(),
            max_pages: config.max_pages.max(1),
            max_asset_bytes: config.max_asset_bytes.as_u64(),
            item_path_markers: config.item_path_markers.clone(),
            item_suffix: config.item_suffix.clone(),
        })
    }
}

/// Shared pipeline state; one instance serves every gallery task
pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    query: Arc<dyn DocumentQuery>,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        query: Arc<dyn DocumentQuery>,
        settings: CrawlerSettings,
    ) -> Self {
        Self {
            fetcher,
            query,
            settings,
        }
    }

    pub fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }
}
