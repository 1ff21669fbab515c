use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ArchiveExtractor, CollaboratorError, Result};

const CANDIDATES: [&str; 2] = ["7z", "7za"];

/// [`ArchiveExtractor`] that runs the 7-Zip command line tool
#[derive(Debug, Clone, Default)]
pub struct SevenZipCli {
    program: Option<PathBuf>,
}

impl SevenZipCli {
    /// Locate `7z` (or `7za`) in `PATH` on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.program {
            return Ok(program.clone());
        }
        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| CollaboratorError::ToolMissing {
                tool: CANDIDATES.join("/"),
            })
    }
}

#[async_trait]
impl ArchiveExtractor for SevenZipCli {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let program = self.program()?;
        debug!(program = %program.display(), archive = %archive.display(), "Extracting archive");

        let output = Command::new(&program)
            .arg("x")
            .arg(archive)
            .arg(format!("-o{}", dest.display()))
            .arg("-y")
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(archive = %archive.display(), status = %output.status, "Extraction failed");
        Err(CollaboratorError::ToolFailed {
            tool: program.display().to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }
}
