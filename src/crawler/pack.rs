use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use zip::ZipWriter;
use zip::write::FileOptions;

use super::Crawler;
use crate::handlers::{HandlerError, blocking};
use crate::tasks::events::ProgressStage;
use crate::tasks::model::{CrawlResult, ErrorDetail, Gallery, GalleryReport};
use crate::tasks::progress::ProgressReporter;

const MAX_TITLE_CHARS: usize = 100;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static filename pattern is valid"));

/// Replace characters that are invalid in file names and cap the length
pub fn sanitize_filename(title: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title.trim(), "_");
    let truncated: String = cleaned.chars().take(MAX_TITLE_CHARS).collect();
    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated
    }
}

/// Archive entry name for the asset at 1-based `index`
pub fn entry_name(index: usize, asset_url: &Url) -> String {
    let ext = Path::new(asset_url.path())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());
    format!("{:04}.{}", index, ext)
}

/// Archive writer shared by concurrent downloads; one writer at a time
struct ArchiveSink {
    zip: ZipWriter<File>,
    written: usize,
}

type SharedSink = Arc<Mutex<ArchiveSink>>;

fn lock(sink: &SharedSink) -> MutexGuard<'_, ArchiveSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ArchiveSink {
    fn write_entry(&mut self, name: &str, data: &[u8]) -> zip::result::ZipResult<()> {
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        self.zip.start_file(name, options)?;
        self.zip.write_all(data)?;
        self.written += 1;
        Ok(())
    }
}

/// Item-level failure, still carrying its report
struct GalleryFailure {
    report: GalleryReport,
    reason: String,
}

impl Crawler {
    /// Resolve and filter asset sources found on an item page
    fn asset_urls(&self, page_url: &Url, document: &str) -> Vec<Url> {
        let mut seen = HashSet::new();
        self.query
            .asset_links(document)
            .into_iter()
            .filter(|src| !src.contains("logo") && !src.contains("ads"))
            .filter_map(|src| match page_url.join(&src) {
                Ok(url) => Some(url),
                Err(e) => {
                    debug!(src, error = %e, "Skipping unresolvable asset");
                    None
                }
            })
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Package each gallery into its own archive, sequentially
    ///
    /// Per-gallery failures are counted in the result; only cancellation or
    /// an unusable output directory fails the whole run.
    pub async fn crawl_and_pack(
        &self,
        galleries: &[Gallery],
        output: &Path,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<CrawlResult, HandlerError> {
        tokio::fs::create_dir_all(output).await?;

        let total = galleries.len();
        let mut result = CrawlResult::default();

        for (i, gallery) in galleries.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            progress.stage(ProgressStage::Fetching, i + 1, total, gallery.title.clone());

            match self.pack_gallery(gallery, output, cancel, progress).await {
                Ok(report) => {
                    result.success += 1;
                    result.total_images += report.assets_written;
                    if report.is_partial() {
                        warn!(
                            gallery = %gallery.title,
                            written = report.assets_written,
                            failed = report.assets_failed,
                            "Gallery packed with missing assets"
                        );
                    }
                    result.galleries.push(report);
                }
                Err(failure) => {
                    warn!(gallery = %gallery.title, reason = %failure.reason, "Gallery failed");
                    result.failed += 1;
                    result
                        .errors
                        .push(ErrorDetail::gallery(gallery.title.clone(), failure.reason));
                    result.galleries.push(failure.report);
                }
            }
            progress.report(i + 1, total);
        }

        info!(
            success = result.success,
            failed = result.failed,
            images = result.total_images,
            "Crawl finished"
        );
        Ok(result)
    }

    async fn pack_gallery(
        &self,
        gallery: &Gallery,
        output: &Path,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<GalleryReport, GalleryFailure> {
        let mut report = GalleryReport {
            title: gallery.title.clone(),
            url: gallery.url.clone(),
            archive: None,
            assets_found: 0,
            assets_written: 0,
            assets_failed: 0,
        };
        let fail = |report: GalleryReport, reason: String| GalleryFailure { report, reason };

        let page_url = match Url::parse(&gallery.url) {
            Ok(url) => url,
            Err(e) => return Err(fail(report, format!("invalid gallery url: {}", e))),
        };
        let body = match self
            .fetcher
            .get(page_url.as_str(), self.settings.referer.as_deref())
            .await
        {
            Ok(body) => body,
            Err(e) => return Err(fail(report, e.to_string())),
        };

        let assets = self.asset_urls(&page_url, &String::from_utf8_lossy(&body));
        report.assets_found = assets.len();
        if assets.is_empty() {
            return Err(fail(report, "no images found".to_string()));
        }

        let archive_path = output.join(format!("{}.zip", sanitize_filename(&gallery.title)));
        let create_path = archive_path.clone();
        let file = match blocking(move || File::create(create_path)).await {
            Ok(Ok(file)) => file,
            Ok(Err(e)) => return Err(fail(report, format!("cannot create archive: {}", e))),
            Err(e) => return Err(fail(report, e.to_string())),
        };
        let sink = Arc::new(Mutex::new(ArchiveSink {
            zip: ZipWriter::new(file),
            written: 0,
        }));

        let failed = self
            .download_assets(&gallery.title, assets, Arc::clone(&sink), cancel, progress)
            .await;

        let finished = blocking(move || {
            let mut sink = lock(&sink);
            let written = sink.written;
            sink.zip.finish().map(|_| written).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|finished| finished);
        report.assets_failed = failed;

        let written = match finished {
            Ok(written) => written,
            Err(e) => {
                remove_archive(&archive_path).await;
                return Err(fail(report, format!("failed to finalize archive: {}", e)));
            }
        };
        report.assets_written = written;

        if report.assets_written == 0 {
            remove_archive(&archive_path).await;
            return Err(fail(report, "all downloads failed".to_string()));
        }

        report.archive = Some(archive_path.to_string_lossy().into_owned());
        debug!(
            archive = %archive_path.display(),
            written = report.assets_written,
            "Gallery archived"
        );
        Ok(report)
    }

    /// Download with bounded parallelism; returns the number of failed assets
    async fn download_assets(
        &self,
        title: &str,
        assets: Vec<Url>,
        sink: SharedSink,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> usize {
        let total = assets.len();
        let permits = Arc::new(Semaphore::new(self.settings.download_concurrency));
        let mut downloads = JoinSet::new();
        let mut failed = 0;

        for (index, url) in assets.into_iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(gallery = title, "Cancelled, not queueing further downloads");
                break;
            }
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let fetcher = Arc::clone(&self.fetcher);
            let referer = self.settings.referer.clone();
            let limit = self.settings.max_asset_bytes;
            let sink = Arc::clone(&sink);
            let progress = progress.clone();
            let title = title.to_string();
            let name = entry_name(index + 1, &url);

            downloads.spawn(async move {
                let _permit = permit;
                let data: Bytes = match fetcher.get(url.as_str(), referer.as_deref()).await {
                    Ok(data) if data.len() as u64 > limit => {
                        warn!(url = %url, size = data.len(), limit, "Asset too large");
                        return false;
                    }
                    Ok(data) => data,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Asset download failed");
                        return false;
                    }
                };

                let written = blocking(move || {
                    let mut sink = lock(&sink);
                    match sink.write_entry(&name, &data) {
                        Ok(()) => {
                            progress.stage(ProgressStage::Downloading, sink.written, total, title);
                            true
                        }
                        Err(e) => {
                            warn!(entry = name, error = %e, "Failed to write archive entry");
                            false
                        }
                    }
                })
                .await;
                written.unwrap_or_else(|e| {
                    warn!(error = %e, "Archive write task failed");
                    false
                })
            });
        }

        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    warn!(error = %e, "Download task aborted");
                    failed += 1;
                }
            }
        }
        failed
    }
}

async fn remove_archive(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("  "), "untitled");
    }

    #[test]
    fn test_sanitize_truncates_by_chars() {
        let long = "é".repeat(150);
        assert_eq!(sanitize_filename(&long).chars().count(), 100);
    }

    #[test]
    fn test_entry_name_extension() {
        let url = Url::parse("https://cdn.example.com/a/b/photo.PNG?x=1").unwrap();
        assert_eq!(entry_name(7, &url), "0007.png");

        let url = Url::parse("https://cdn.example.com/a/b/noext").unwrap();
        assert_eq!(entry_name(12, &url), "0012.jpg");
    }
}
