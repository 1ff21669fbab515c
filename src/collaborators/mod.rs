//! Ports for work the engine delegates to the outside world
//!
//! Handlers only see these traits. The default adapters walk the local
//! filesystem, shell out to 7-Zip and create symlinks; e-book packaging has
//! no default and must be supplied by the embedder.

mod ebook;
mod fs;
mod links;
mod sevenzip;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::tasks::model::FileInfo;

pub use ebook::{EbookConverter, EbookRequest};
pub use fs::{WalkDirEnumerator, has_extension};
pub use links::SymlinkCreator;
pub use sevenzip::SevenZipCli;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{tool} not found in PATH")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("directory walk failed: {0}")]
    Walk(String),

    #[error("{0}")]
    Conversion(String),
}

pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Lists regular files under a root that satisfy a predicate
pub trait FileEnumerator: Send + Sync {
    fn list(
        &self,
        root: &Path,
        recursive: bool,
        filter: &dyn Fn(&Path) -> bool,
    ) -> Result<Vec<FileInfo>>;
}

/// Unpacks an archive into a directory
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// Creates a link at `link` pointing to `target`; returns the path written
pub trait LinkCreator: Send + Sync {
    fn create_link(&self, target: &Path, link: &Path) -> Result<PathBuf>;
}
