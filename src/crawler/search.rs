use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Crawler, FetchError, ItemLink};
use crate::handlers::HandlerError;
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{Gallery, SearchResult};
use crate::tasks::progress::ProgressReporter;

static COUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)P\]").expect("static count pattern is valid"));

/// One parsed result page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub page: u32,
    pub galleries: Vec<Gallery>,
    pub has_next: bool,
}

/// Trailing `[123P]` marker in an item title
fn image_count(title: &str) -> usize {
    COUNT_PATTERN
        .captures_iter(title)
        .last()
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

impl Crawler {
    pub fn search_url(&self, keyword: &str, page: u32) -> String {
        let base = self.settings.base_url.as_str().trim_end_matches('/');
        let keyword = urlencoding::encode(keyword);
        if page <= 1 {
            format!("{}/search/{}/", base, keyword)
        } else {
            format!("{}/search/{}/{}/", base, keyword, page)
        }
    }

    fn to_gallery(&self, link: ItemLink) -> Option<Gallery> {
        let is_item = self
            .settings
            .item_path_markers
            .iter()
            .any(|marker| link.href.contains(marker.as_str()))
            && link.href.ends_with(&self.settings.item_suffix);
        if !is_item {
            return None;
        }

        let url = match self.settings.base_url.join(&link.href) {
            Ok(url) => url,
            Err(e) => {
                debug!(href = %link.href, error = %e, "Skipping unresolvable item link");
                return None;
            }
        };

        Some(Gallery {
            url: url.to_string(),
            image_count: image_count(&link.title),
            title: link.title,
            thumbnail: link.thumbnail,
        })
    }

    /// Fetch and parse one result page, deduplicated within the page
    pub async fn search_page(&self, keyword: &str, page: u32) -> Result<SearchPage, FetchError> {
        let url = self.search_url(keyword, page);
        let body = self.fetcher.get(&url, None).await?;
        let document = String::from_utf8_lossy(&body);

        let mut seen = HashSet::new();
        let galleries: Vec<Gallery> = self
            .query
            .item_links(&document)
            .into_iter()
            .filter_map(|link| self.to_gallery(link))
            .filter(|gallery| seen.insert(gallery.url.clone()))
            .collect();

        let next_marker = format!("/{}/", page + 1);
        let has_next = self
            .query
            .pagination_links(&document)
            .iter()
            .any(|href| href.contains(&next_marker));

        debug!(url, count = galleries.len(), has_next, "Parsed search page");
        Ok(SearchPage {
            page,
            galleries,
            has_next,
        })
    }

    /// Walk result pages until exhausted, capped by `max_pages`
    ///
    /// A failure on the first page fails the search; a later failure keeps
    /// what was gathered so far.
    pub async fn search(
        &self,
        keyword: &str,
        max_pages: u32,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<SearchResult, HandlerError> {
        let max_pages = max_pages.max(1);
        let mut seen = HashSet::new();
        let mut galleries = Vec::new();
        let mut pages_loaded = 0;
        let mut has_more = true;
        let mut page = 1;

        while page <= max_pages && has_more {
            if cancel.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            if page > 1 && !self.settings.page_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
                    _ = tokio::time::sleep(self.settings.page_delay) => {}
                }
            }

            let result = match self.search_page(keyword, page).await {
                Ok(result) => result,
                Err(e) if page == 1 => {
                    return Err(HandlerError::Network(format!("search failed: {}", e)));
                }
                Err(e) => {
                    warn!(keyword, page, error = %e, "Search page failed, keeping earlier results");
                    break;
                }
            };
            pages_loaded = page;

            if result.galleries.is_empty() {
                has_more = false;
            } else {
                for gallery in result.galleries {
                    if seen.insert(gallery.url.clone()) {
                        galleries.push(gallery);
                    }
                }
                has_more = result.has_next;
            }

            progress.stage(
                ProgressStage::Searching,
                page as usize,
                max_pages as usize,
                format!("{} galleries found", galleries.len()),
            );
            progress.report(page as usize, max_pages as usize);
            page += 1;
        }

        info!(keyword, pages_loaded, found = galleries.len(), "Search finished");
        Ok(SearchResult {
            success: true,
            galleries,
            pages_loaded,
            has_more: has_more && page <= max_pages,
        })
    }
}
