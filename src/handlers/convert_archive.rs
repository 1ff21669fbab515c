use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::archive::{blocking, move_file, unique_path, zip_files};
use super::traits::{HandlerError, TaskContext, TaskHandler, mismatch};
use crate::collaborators::{ArchiveExtractor, FileEnumerator, has_extension};
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{
    Convert7zParams, ErrorDetail, FileInfo, TaskKind, TaskOutput, TaskPayload, TaskResult,
};

/// Re-packs 7z archives as zip, pulling videos out into their own folder
pub struct Convert7zHandler {
    extractor: Arc<dyn ArchiveExtractor>,
    enumerator: Arc<dyn FileEnumerator>,
    video_extensions: Vec<String>,
}

/// What happened to one archive that extracted cleanly
struct Conversion {
    zip_error: Option<String>,
    move_errors: Vec<String>,
}

impl Convert7zHandler {
    pub fn new(
        extractor: Arc<dyn ArchiveExtractor>,
        enumerator: Arc<dyn FileEnumerator>,
        video_extensions: Vec<String>,
    ) -> Self {
        Self {
            extractor,
            enumerator,
            video_extensions,
        }
    }

    async fn convert_one(
        &self,
        archive: &FileInfo,
        video_out: &Path,
        level: Option<i32>,
    ) -> Result<Conversion, String> {
        let source = PathBuf::from(&archive.path);
        let workdir = tempfile::Builder::new()
            .prefix("taskbox-extract-")
            .tempdir()
            .map_err(|e| format!("temp dir error: {}", e))?;

        self.extractor
            .extract(&source, workdir.path())
            .await
            .map_err(|e| format!("extract failed: {}", e))?;

        let enumerator = Arc::clone(&self.enumerator);
        let root = workdir.path().to_path_buf();
        let extracted = blocking(move || enumerator.list(&root, true, &|_| true))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

        let (videos, others): (Vec<PathBuf>, Vec<PathBuf>) = extracted
            .into_iter()
            .map(|file| PathBuf::from(file.path))
            .partition(|path| has_extension(path, &self.video_extensions));

        let mut move_errors = Vec::new();
        for video in &videos {
            let stem = video.file_stem().unwrap_or_default().to_string_lossy();
            let ext = video
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let dest = unique_path(video_out, &stem, &ext);
            if let Err(e) = move_file(video, &dest).await {
                warn!(video = %video.display(), error = %e, "Failed to move video");
                move_errors.push(format!("move {}: {}", stem, e));
            }
        }

        let mut zip_error = None;
        if !others.is_empty() {
            let dest = source.with_extension("zip");
            let base = workdir.path().to_path_buf();
            let zipped = blocking(move || zip_files(&dest, &others, &base, level))
                .await
                .map_err(|e| e.to_string())?;
            if let Err(e) = zipped {
                zip_error = Some(format!("zip failed: {}", e));
            }
        }

        debug!(archive = %archive.name, videos = videos.len(), "Archive converted");
        Ok(Conversion {
            zip_error,
            move_errors,
        })
    }
}

#[async_trait]
impl TaskHandler for Convert7zHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Convert7zToZip
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::Convert7zToZip(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        let Convert7zParams {
            files,
            video_output_path,
            keep_original,
            compression_level,
        } = params;
        if video_output_path.trim().is_empty() {
            return Err(HandlerError::Validation(
                "video output path is required".to_string(),
            ));
        }

        let video_out = PathBuf::from(video_output_path);
        tokio::fs::create_dir_all(&video_out).await?;

        let total = files.len();
        let mut result = TaskResult::default();

        for (i, file) in files.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress
                .stage(ProgressStage::Processing, i + 1, total, file.name.clone());

            match self.convert_one(file, &video_out, *compression_level).await {
                Ok(conversion) => {
                    // Extraction worked, so the archive counts as converted
                    result.record_success();
                    let clean = conversion.zip_error.is_none() && conversion.move_errors.is_empty();
                    for message in conversion.move_errors.into_iter().chain(conversion.zip_error) {
                        result.errors.push(ErrorDetail::file(&file.name, message));
                    }
                    if clean && !keep_original {
                        if let Err(e) = tokio::fs::remove_file(&file.path).await {
                            warn!(archive = %file.path, error = %e, "Failed to remove original");
                        }
                    }
                }
                Err(message) => result.record_failure(ErrorDetail::file(&file.name, message)),
            }
            ctx.progress.report(i + 1, total);
        }

        info!(task_id = %ctx.id, success = result.success, failed = result.failed, "Archives converted");
        Ok(result.into())
    }
}
