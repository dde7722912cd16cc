//! Incremental window selection over dated daily archives
//!
//! The regulator publishes one `<YYYYMMDD>.zip` archive per business day.
//! Given a start date (explicit, or "today" in the filings timezone), the
//! selector lists the bucket prefix, keeps exactly the archives whose encoded
//! date is on or after the start date, skips archives already complete in the
//! local cache (keyed by expected byte size), and downloads the rest in
//! ascending date order. The window bound is a performance optimization, not
//! a dedup mechanism: merging an already-seen archive is harmless, it just
//! wastes transfer and parse time.
//!
//! A projected download volume above the configured threshold pauses for an
//! explicit confirmation, as a safety valve against a stale start date
//! pulling months of archives. One archive failing to download is recorded
//! and does not abort the rest of the window.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

lazy_static! {
    static ref DATED_ZIP: Regex = Regex::new(r"^(\d{8})\.zip$").unwrap();
}

/// One object in the remote listing.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
}

/// Listing and fetch seam over the archive bucket. Implemented by the
/// unsigned S3 client in production and by in-memory doubles in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects under `prefix`, across listing pages.
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>>;

    /// Download `key` to `local_path`.
    async fn fetch(&self, key: &str, local_path: &Path) -> Result<()>;
}

/// Confirmation gate for large projected downloads.
pub trait Confirm: Send + Sync {
    fn confirm(&self, total_bytes: u64, archive_count: usize) -> bool;
}

/// Non-interactive gate that always proceeds.
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _total_bytes: u64, _archive_count: usize) -> bool {
        true
    }
}

/// A selected archive, present and size-verified on local disk.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    pub path: PathBuf,
    /// Encoded archive date, `YYYYMMDD`
    pub date: NaiveDate,
    /// Source fingerprint carried onto the batches parsed from this archive
    pub fingerprint: String,
}

/// Outcome of one selection run.
#[derive(Debug, Default)]
pub struct WindowSelection {
    /// Ready archives in ascending date order
    pub archives: Vec<LocalArchive>,
    /// Archives skipped because the cache already held a size-complete copy
    pub skipped: usize,
    /// Archives freshly downloaded this run
    pub downloaded: usize,
    /// Per-archive download failures, `(key, reason)`
    pub failed: Vec<(String, String)>,
    /// True when the volume confirmation was declined; nothing was processed
    pub declined: bool,
}

pub struct IncrementalWindowSelector<'a> {
    store: &'a dyn ObjectStore,
    download_dir: PathBuf,
    confirm_threshold_bytes: u64,
}

impl<'a> IncrementalWindowSelector<'a> {
    pub fn new(store: &'a dyn ObjectStore, download_dir: PathBuf, confirm_threshold_bytes: u64) -> Self {
        Self {
            store,
            download_dir,
            confirm_threshold_bytes,
        }
    }

    /// Run the selection: LISTING -> SIZE_CHECK -> (CONFIRM_IF_LARGE) ->
    /// DOWNLOADING -> READY.
    pub async fn select(
        &self,
        prefix: &str,
        start_date: NaiveDate,
        confirm: &dyn Confirm,
    ) -> Result<WindowSelection> {
        std::fs::create_dir_all(&self.download_dir)?;

        debug!("Listing archives under '{}'", prefix);
        let objects = self.store.list(prefix).await?;

        let mut candidates: Vec<(RemoteObject, NaiveDate, PathBuf, bool)> = Vec::new();
        for object in objects {
            let filename = match object.key.rsplit('/').next() {
                Some(name) => name.to_string(),
                None => continue,
            };
            // Keys not shaped like <8 digits>.zip are ignored, not errors
            let date = match archive_date(&filename) {
                Some(date) => date,
                None => continue,
            };
            if date < start_date {
                continue;
            }
            let local_path = self.download_dir.join(&filename);
            let cached = file_exists_and_complete(&local_path, object.size);
            candidates.push((object, date, local_path, cached));
        }
        candidates.sort_by_key(|(_, date, _, _)| *date);

        let pending_bytes: u64 = candidates
            .iter()
            .filter(|(_, _, _, cached)| !cached)
            .map(|(object, _, _, _)| object.size)
            .sum();
        info!(
            "Found {} archive(s) since {}; {} byte(s) to download",
            candidates.len(),
            start_date,
            pending_bytes
        );

        if pending_bytes > self.confirm_threshold_bytes {
            let pending = candidates.iter().filter(|(_, _, _, cached)| !cached).count();
            if !confirm.confirm(pending_bytes, pending) {
                warn!("Download of {} byte(s) declined; aborting window", pending_bytes);
                return Ok(WindowSelection {
                    declined: true,
                    ..WindowSelection::default()
                });
            }
        }

        let mut selection = WindowSelection::default();
        for (object, date, local_path, cached) in candidates {
            if cached {
                debug!("Skipping {} - already complete locally", object.key);
                selection.skipped += 1;
            } else {
                info!("Downloading {} ({} bytes)", object.key, object.size);
                match self.download_verified(&object, &local_path).await {
                    Ok(()) => selection.downloaded += 1,
                    Err(e) => {
                        warn!("Failed to download {}: {}", object.key, e);
                        selection.failed.push((object.key.clone(), e.to_string()));
                        continue;
                    }
                }
            }
            selection.archives.push(LocalArchive {
                path: local_path,
                date,
                fingerprint: date.format("%Y%m%d").to_string(),
            });
        }

        info!(
            "Window ready: {} archive(s) ({} downloaded, {} cached, {} failed)",
            selection.archives.len(),
            selection.downloaded,
            selection.skipped,
            selection.failed.len()
        );
        Ok(selection)
    }

    async fn download_verified(&self, object: &RemoteObject, local_path: &Path) -> Result<()> {
        self.store.fetch(&object.key, local_path).await?;
        // A size match is the completeness evidence; content hashing is not used
        if !file_exists_and_complete(local_path, object.size) {
            let _ = std::fs::remove_file(local_path);
            return Err(IngestError::Transfer(format!(
                "size mismatch after downloading {}: expected {} bytes",
                object.key, object.size
            )));
        }
        Ok(())
    }
}

/// Extract the encoded date from a `<YYYYMMDD>.zip` filename.
pub fn archive_date(filename: &str) -> Option<NaiveDate> {
    let captures = DATED_ZIP.captures(filename)?;
    NaiveDate::parse_from_str(&captures[1], "%Y%m%d").ok()
}

/// Today in the filings reference timezone (EST, fixed UTC-5).
pub fn default_start_date() -> NaiveDate {
    let est = FixedOffset::west_opt(5 * 3600).expect("fixed offset in range");
    Utc::now().with_timezone(&est).date_naive()
}

fn file_exists_and_complete(path: &Path, expected_size: u64) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.len() == expected_size,
        Err(_) => false,
    }
}
