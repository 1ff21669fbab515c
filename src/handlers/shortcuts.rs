use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::archive::{blocking, dotted_extension, plain_file_name, unique_path};
use super::traits::{HandlerError, TaskContext, TaskHandler, mismatch};
use crate::collaborators::LinkCreator;
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{
    CreateShortcutsParams, ErrorDetail, NamingMode, TaskKind, TaskOutput, TaskPayload,
    TaskResult, VideoFile,
};

/// Links every selected video into one target folder
pub struct CreateShortcutsHandler {
    links: Arc<dyn LinkCreator>,
}

impl CreateShortcutsHandler {
    pub fn new(links: Arc<dyn LinkCreator>) -> Self {
        Self { links }
    }
}

/// Where the link for `video` goes under `target`
fn link_path(target: &Path, video: &VideoFile, mode: NamingMode) -> PathBuf {
    match mode {
        NamingMode::Original => target.join(&video.name),
        NamingMode::Folder => target.join(format!("{}_{}", video.parent_folder, video.name)),
        NamingMode::FolderOnly => {
            unique_path(target, &video.parent_folder, &dotted_extension(&video.name))
        }
    }
}

#[async_trait]
impl TaskHandler for CreateShortcutsHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CreateShortcuts
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::CreateShortcuts(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        let CreateShortcutsParams {
            videos,
            target_path,
            naming_mode,
        } = params;
        if target_path.trim().is_empty() {
            return Err(HandlerError::Validation("target path is required".to_string()));
        }
        for video in videos {
            plain_file_name(&video.name)?;
            if *naming_mode != NamingMode::Original {
                plain_file_name(&video.parent_folder)?;
            }
        }

        let target = PathBuf::from(target_path);
        let total = videos.len();
        let mut result = TaskResult::default();

        for (i, video) in videos.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress
                .stage(ProgressStage::Processing, i + 1, total, video.name.clone());

            let links = Arc::clone(&self.links);
            let source = PathBuf::from(&video.path);
            let link = link_path(&target, video, *naming_mode);
            let created = blocking(move || links.create_link(&source, &link)).await?;

            match created {
                Ok(path) => {
                    debug!(task_id = %ctx.id, link = %path.display(), "Link created");
                    result.record_success();
                }
                Err(e) => result.record_failure(ErrorDetail::file(&video.name, e.to_string())),
            }
            ctx.progress.report(i + 1, total);
        }

        info!(task_id = %ctx.id, success = result.success, failed = result.failed, "Shortcuts created");
        Ok(result.into())
    }
}
