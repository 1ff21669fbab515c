//! Filesystem helpers shared by the file handlers

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::FileOptions;

use super::HandlerError;

/// Write `files` into a new zip at `dest`, naming entries relative to `base`
pub fn zip_files(
    dest: &Path,
    files: &[PathBuf],
    base: &Path,
    level: Option<i32>,
) -> zip::result::ZipResult<()> {
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(level);

    let mut zip = ZipWriter::new(File::create(dest)?);
    for file in files {
        let name = entry_path(file, base);
        zip.start_file(name, options)?;
        let mut source = File::open(file)?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

/// Forward-slash entry path of `file` relative to `base`, else its file name
fn entry_path(file: &Path, base: &Path) -> String {
    let relative = file
        .strip_prefix(base)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(file.file_name().unwrap_or(file.as_os_str())));
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject client-supplied names that would leave the output directory
pub fn plain_file_name(name: &str) -> Result<&str, HandlerError> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(HandlerError::Validation(format!("invalid file name: {:?}", name)));
    }
    Ok(name)
}

/// First free path among `stem.ext`, `stem_1.ext`, `stem_2.ext`, ...
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{}{}", stem, ext));
    if !occupied(&candidate) {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|path| !occupied(path))
        .unwrap_or(candidate)
}

fn occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Dotted extension of `name` (`".mp4"`), or an empty string
pub fn dotted_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Rename, falling back to copy + remove across filesystems
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

/// Run blocking filesystem work off the async workers
pub async fn blocking<F, T>(work: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HandlerError::Fatal(format!("blocking task failed: {}", e)))
}
