use std::path::{Path, PathBuf};

use tracing::debug;

use super::{LinkCreator, Result};

/// [`LinkCreator`] backed by filesystem symlinks
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkCreator;

impl LinkCreator for SymlinkCreator {
    fn create_link(&self, target: &Path, link: &Path) -> Result<PathBuf> {
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        symlink(target, link)?;
        debug!(target = %target.display(), link = %link.display(), "Created link");
        Ok(link.to_path_buf())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_symlink_points_at_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("movie.mp4");
        std::fs::write(&target, b"video").unwrap();

        let link = dir.path().join("links/nested/movie.mp4");
        let written = SymlinkCreator.create_link(&target, &link).unwrap();

        assert_eq!(written, link);
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn test_existing_link_is_an_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.mp4");
        std::fs::write(&target, b"v").unwrap();
        let link = dir.path().join("b.mp4");
        std::fs::write(&link, b"taken").unwrap();

        assert!(SymlinkCreator.create_link(&target, &link).is_err());
    }
}
