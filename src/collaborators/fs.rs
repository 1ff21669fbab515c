use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use super::{CollaboratorError, FileEnumerator, Result};
use crate::tasks::model::FileInfo;

/// Case-insensitive extension match against a list such as `[".jpg", ".png"]`
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// [`FileEnumerator`] over the local filesystem, sorted by path
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkDirEnumerator;

impl FileEnumerator for WalkDirEnumerator {
    fn list(
        &self,
        root: &Path,
        recursive: bool,
        filter: &dyn Fn(&Path) -> bool,
    ) -> Result<Vec<FileInfo>> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| CollaboratorError::Walk(e.to_string()))?;
            if !entry.file_type().is_file() || !filter(entry.path()) {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| CollaboratorError::Walk(e.to_string()))?
                .len();
            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
                size,
            });
        }

        debug!(root = %root.display(), count = files.len(), "Enumerated files");
        Ok(files)
    }
}
