use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::archive::blocking;
use super::traits::{HandlerError, TaskContext, TaskHandler, mismatch};
use crate::collaborators::{EbookConverter, EbookRequest};
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{
    ConvertTxtParams, ErrorDetail, TaskKind, TaskOutput, TaskPayload, TaskResult,
};

const DEFAULT_AUTHOR: &str = "Unknown";

/// Converts plain-text novels to e-books through an [`EbookConverter`]
pub struct TxtToEpubHandler {
    converter: Arc<dyn EbookConverter>,
}

impl TxtToEpubHandler {
    pub fn new(converter: Arc<dyn EbookConverter>) -> Self {
        Self { converter }
    }
}

fn request_for(source: &Path, output: &Path, params: &ConvertTxtParams) -> EbookRequest {
    let title = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string());
    let author = params
        .options
        .author
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AUTHOR)
        .to_string();

    EbookRequest {
        source: source.to_path_buf(),
        dest: output.join(format!("{}.epub", title)),
        title,
        author,
        chapter_pattern: params
            .options
            .custom_pattern
            .clone()
            .filter(|p| !p.trim().is_empty()),
    }
}

#[async_trait]
impl TaskHandler for TxtToEpubHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ConvertTxtToEpub
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::ConvertTxtToEpub(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        if params.output_path.trim().is_empty() {
            return Err(HandlerError::Validation("output path is required".to_string()));
        }

        let output = PathBuf::from(&params.output_path);
        tokio::fs::create_dir_all(&output).await?;

        let total = params.files.len();
        let mut result = TaskResult::default();

        for (i, file) in params.files.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress
                .stage(ProgressStage::Processing, i + 1, total, file.name.clone());

            let converter = Arc::clone(&self.converter);
            let request = request_for(Path::new(&file.path), &output, params);
            match blocking(move || converter.convert(&request)).await? {
                Ok(()) => result.record_success(),
                Err(e) => result.record_failure(ErrorDetail::file(&file.name, e.to_string())),
            }
            ctx.progress.report(i + 1, total);
        }

        info!(task_id = %ctx.id, success = result.success, failed = result.failed, "Texts converted");
        Ok(result.into())
    }
}
