use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::archive::{blocking, plain_file_name, zip_files};
use super::traits::{HandlerError, TaskContext, TaskHandler, mismatch};
use crate::collaborators::{FileEnumerator, has_extension};
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{
    ErrorDetail, FolderInfo, PackImagesParams, TaskKind, TaskOutput, TaskPayload, TaskResult,
};

/// Zips the images of each selected folder into `{target}/{folder}.zip`
pub struct PackImagesHandler {
    enumerator: Arc<dyn FileEnumerator>,
    image_extensions: Arc<Vec<String>>,
}

impl PackImagesHandler {
    pub fn new(enumerator: Arc<dyn FileEnumerator>, image_extensions: Vec<String>) -> Self {
        Self {
            enumerator,
            image_extensions: Arc::new(image_extensions),
        }
    }

    async fn pack_one(
        &self,
        folder: &FolderInfo,
        target: &Path,
        level: Option<i32>,
    ) -> Result<(), String> {
        let enumerator = Arc::clone(&self.enumerator);
        let extensions = Arc::clone(&self.image_extensions);
        let root = PathBuf::from(&folder.path);
        let dest = target.join(format!("{}.zip", folder.name));

        blocking(move || {
            let images = enumerator
                .list(&root, true, &|path| has_extension(path, &extensions))
                .map_err(|e| e.to_string())?;
            if images.is_empty() {
                return Err("No images found".to_string());
            }
            let paths: Vec<PathBuf> = images.into_iter().map(|f| PathBuf::from(f.path)).collect();
            zip_files(&dest, &paths, &root, level).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl TaskHandler for PackImagesHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::PackImages
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
        let TaskPayload::PackImages(params) = &ctx.payload else {
            return Err(mismatch(self.kind(), &ctx.payload));
        };
        let PackImagesParams {
            folders,
            target_path,
            compression_level,
        } = params;
        if target_path.trim().is_empty() {
            return Err(HandlerError::Validation("target path is required".to_string()));
        }
        for folder in folders {
            plain_file_name(&folder.name)?;
        }

        let target = PathBuf::from(target_path);
        tokio::fs::create_dir_all(&target).await?;

        let total = folders.len();
        let mut result = TaskResult::default();

        for (i, folder) in folders.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress
                .stage(ProgressStage::Processing, i + 1, total, folder.name.clone());

            match self.pack_one(folder, &target, *compression_level).await {
                Ok(()) => result.record_success(),
                Err(message) => result.record_failure(ErrorDetail::file(&folder.name, message)),
            }
            ctx.progress.report(i + 1, total);
        }

        info!(task_id = %ctx.id, success = result.success, failed = result.failed, "Images packed");
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::WalkDirEnumerator;
    use crate::tasks::model::TaskId;
    use crate::tasks::progress::RecordingProgress;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn handler() -> PackImagesHandler {
        PackImagesHandler::new(
            Arc::new(WalkDirEnumerator),
            vec![".jpg".to_string(), ".png".to_string()],
        )
    }

    fn folder(dir: &Path, name: &str, files: &[&str]) -> FolderInfo {
        let path = dir.join(name);
        std::fs::create_dir_all(&path).unwrap();
        for file in files {
            std::fs::write(path.join(file), b"data").unwrap();
        }
        FolderInfo {
            name: name.to_string(),
            path: path.to_string_lossy().into_owned(),
            image_count: files.len(),
            total_size: 0,
        }
    }

    fn context(
        folders: Vec<FolderInfo>,
        target: &Path,
        recorder: &Arc<RecordingProgress>,
    ) -> TaskContext {
        TaskContext {
            id: TaskId(1),
            payload: TaskPayload::PackImages(PackImagesParams {
                folders,
                target_path: target.to_string_lossy().into_owned(),
                compression_level: Some(6),
            }),
            cancel: CancellationToken::new(),
            progress: recorder.reporter(TaskId(1)),
        }
    }

    async fn run(folders: Vec<FolderInfo>, target: &Path) -> (TaskResult, Arc<RecordingProgress>) {
        let recorder = RecordingProgress::new();
        let ctx = context(folders, target, &recorder);
        match handler().execute(ctx).await.unwrap() {
            TaskOutput::Batch(result) => (result, recorder),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_folder_without_images_fails_item() {
        let dir = TempDir::new().unwrap();
        let empty = folder(dir.path(), "empty", &["notes.txt"]);

        let (result, recorder) = run(vec![empty], &dir.path().join("out")).await;

        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].error, "No images found");
        assert_eq!(recorder.reports(), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn test_images_zipped_per_folder() {
        let dir = TempDir::new().unwrap();
        let album = folder(dir.path(), "album", &["1.jpg", "2.PNG", "skip.txt"]);
        let empty = folder(dir.path(), "empty", &[]);
        let out = dir.path().join("out");

        let (result, _) = run(vec![album, empty], &out).await;

        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 1);
        let zip = std::fs::File::open(out.join("album.zip")).unwrap();
        let archive = zip::ZipArchive::new(zip).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(!out.join("empty.zip").exists());
    }

    #[tokio::test]
    async fn test_folder_name_cannot_escape_target() {
        let dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let mut album = folder(dir.path(), "album", &["1.jpg"]);
        album.name = elsewhere.path().join("escaped").to_string_lossy().into_owned();
        let out = dir.path().join("out");

        let recorder = RecordingProgress::new();
        let result = handler().execute(context(vec![album], &out, &recorder)).await;

        assert!(matches!(result, Err(HandlerError::Validation(_))));
        assert!(!elsewhere.path().join("escaped.zip").exists());
        assert!(!out.exists());
    }
}
