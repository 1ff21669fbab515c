use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::traits::{HandlerError, TaskContext, TaskHandler, mismatch};
use crate::crawler::Crawler;
use crate::tasks::model::{TaskKind, TaskOutput, TaskPayload};

/// Paginated keyword search
pub struct GallerySearchHandler {
    crawler: Arc<Crawler>,
}

impl GallerySearchHandler {
    pub fn new(crawler: Arc<Crawler>) -> Self {
        Self { crawler }
    }
}

#[async_trait]
impl TaskHandler for GallerySearchHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::GallerySearch
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::GallerySearch(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        let keyword = params.keyword.trim();
        if keyword.is_empty() {
            return Err(HandlerError::Validation("keyword is required".to_string()));
        }
        let max_pages = params
            .max_pages
            .filter(|&pages| pages > 0)
            .unwrap_or(self.crawler.settings().max_pages);

        let result = self
            .crawler
            .search(keyword, max_pages, &ctx.cancel, &ctx.progress)
            .await?;
        Ok(result.into())
    }
}

/// Downloads selected galleries into one archive each
pub struct GalleryCrawlHandler {
    crawler: Arc<Crawler>,
}

impl GalleryCrawlHandler {
    pub fn new(crawler: Arc<Crawler>) -> Self {
        Self { crawler }
    }
}

#[async_trait]
impl TaskHandler for GalleryCrawlHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::GalleryCrawl
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::GalleryCrawl(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        if params.output_path.trim().is_empty() {
            return Err(HandlerError::Validation("output path is required".to_string()));
        }

        let output = PathBuf::from(&params.output_path);
        let result = self
            .crawler
            .crawl_and_pack(&params.galleries, &output, &ctx.cancel, &ctx.progress)
            .await?;
        Ok(result.into())
    }
}
