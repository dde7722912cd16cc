//! Run orchestration for the bulk and incremental ingestion paths
//!
//! Fully sequential: one partition is merged before the next begins, and
//! batches within a partition are merged in source order. Archive-level
//! failures are isolated and aggregated into the run summary; a partition's
//! validation or store failure aborts only that partition's merge.

use crate::archive;
use crate::config::{bulk_categories, CategorySpec, Config};
use crate::error::Result;
use crate::merge::MergeEngine;
use crate::parquet_store;
use crate::partition::{Batch, MergeOutcome, PartitionKey};
use crate::source::{list_files_by_type, read_bulk_text, FilingParser};
use crate::window::{Confirm, IncrementalWindowSelector, ObjectStore};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Aggregated outcome of one run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    /// Archives fully parsed and handed to the merge engine
    pub archives_succeeded: usize,
    /// Archives that failed to download, extract, or parse
    pub archives_failed: usize,
    /// Archives skipped because a complete local copy existed
    pub archives_skipped: usize,
    /// One entry per committed merge
    pub merges: Vec<MergeOutcome>,
    /// `(subject, reason)` for every recorded error
    pub errors: Vec<(String, String)>,
    /// True when the operator declined a large download window
    pub declined: bool,
}

impl RunSummary {
    fn record_error(&mut self, subject: impl Into<String>, reason: impl ToString) {
        self.errors.push((subject.into(), reason.to_string()));
    }

    pub fn rows_added(&self) -> usize {
        self.merges.iter().map(|m| m.rows_added).sum()
    }
}

/// Ingest every configured bulk category: download, extract, parse, and
/// merge into its relational partition. Categories are independent; one
/// failing is recorded and does not stop the rest.
pub async fn run_bulk(
    config: &Config,
    http: &reqwest::Client,
    engine: &mut MergeEngine,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for spec in bulk_categories() {
        let key = PartitionKey::category_year(spec.category, spec.year);
        match ingest_category(config, http, engine, &spec).await {
            Ok(outcome) => {
                summary.archives_succeeded += 1;
                summary.merges.push(outcome);
            }
            Err(e) => {
                error!("Bulk category {} failed: {}", key, e);
                summary.archives_failed += 1;
                summary.record_error(key.to_string(), e);
            }
        }
    }
    info!(
        "Bulk run complete: {} categor(ies) merged, {} failed, {} row(s) added",
        summary.archives_succeeded,
        summary.archives_failed,
        summary.rows_added()
    );
    Ok(summary)
}

async fn ingest_category(
    config: &Config,
    http: &reqwest::Client,
    engine: &mut MergeEngine,
    spec: &CategorySpec,
) -> Result<MergeOutcome> {
    let url = format!("{}{}", config.bulk_base_url, spec.remainder);
    let zip_path = config
        .data_dir
        .join("bulk_zip")
        .join(format!("{}_{}.zip", spec.category, spec.year));
    let extract_dir = config.data_dir.join("bulk_extract").join(spec.category);

    info!("Ingesting bulk category {} ({})", spec.category, url);
    archive::download_zip(http, &url, &zip_path).await?;
    archive::extract_zip(&zip_path, &extract_dir, true)?;

    let txt_files = list_files_by_type(&extract_dir, "txt")?;
    let txt_path = txt_files.first().ok_or_else(|| {
        crate::error::IngestError::Format(format!(
            "no .txt payload in {}",
            extract_dir.display()
        ))
    })?;
    let mut frame = read_bulk_text(txt_path, spec.columns)?;
    let key = PartitionKey::category_year(spec.category, spec.year);

    // Stage the parsed archive as Parquet: a debuggable artifact mirroring
    // what gets merged, one file per category and year
    let staged = key.file_path(&config.data_dir.join("bulk_parquet"));
    parquet_store::write_atomic(&staged, &mut frame)?;

    let batch = Batch::new(key, frame).with_fingerprint(spec.remainder);
    engine.merge_table(&batch)
}

/// Ingest daily electronic-filing archives on or after `start_date`.
pub async fn run_incremental(
    config: &Config,
    store: &dyn ObjectStore,
    confirm: &dyn Confirm,
    engine: &mut MergeEngine,
    start_date: NaiveDate,
    fastfec_bin: &str,
) -> Result<RunSummary> {
    info!("Ingesting electronic filed reports since {}", start_date);
    let selector = IncrementalWindowSelector::new(
        store,
        config.download_dir.clone(),
        config.confirm_threshold_bytes,
    );
    let selection = selector
        .select(&config.electronic_prefix, start_date, confirm)
        .await?;

    let mut summary = RunSummary {
        archives_skipped: selection.skipped,
        declined: selection.declined,
        ..RunSummary::default()
    };
    for (key, reason) in &selection.failed {
        summary.archives_failed += 1;
        summary.record_error(key.clone(), reason.clone());
    }
    if selection.declined {
        return Ok(summary);
    }

    let parser = FilingParser::new(fastfec_bin, config.data_dir.join("electronic_fec_csv"));
    let mut collected: BTreeMap<String, Vec<DataFrame>> = BTreeMap::new();

    // Ascending date order: a later archive may extend an earlier one, so
    // its rows must land after it in the concatenation
    for local in &selection.archives {
        let extract_dir = config
            .data_dir
            .join("electronic_fec")
            .join(&local.fingerprint);
        if let Err(e) = archive::extract_zip(&local.path, &extract_dir, false) {
            warn!("Skipping archive {}: {}", local.fingerprint, e);
            summary.archives_failed += 1;
            summary.record_error(local.fingerprint.clone(), e);
            continue;
        }
        match parser.parse_archive(&extract_dir) {
            Ok(batches) => {
                for (subject, reason) in batches.errors {
                    summary.record_error(subject, reason);
                }
                for (form_type, frame) in batches.frames {
                    collected.entry(form_type).or_default().push(frame);
                }
                summary.archives_succeeded += 1;
            }
            Err(e) => {
                warn!("Skipping archive {}: {}", local.fingerprint, e);
                summary.archives_failed += 1;
                summary.record_error(local.fingerprint.clone(), e);
            }
        }
    }

    merge_form_types(engine, collected, &mut summary);
    info!(
        "Incremental run complete: {} archive(s) merged, {} failed, {} skipped, {} row(s) added",
        summary.archives_succeeded,
        summary.archives_failed,
        summary.archives_skipped,
        summary.rows_added()
    );
    Ok(summary)
}

/// Merge the per-form-type frames collected in one run, each form type
/// independently: a failure for one is recorded and never blocks or
/// corrupts the others.
pub fn merge_form_types(
    engine: &mut MergeEngine,
    collected: BTreeMap<String, Vec<DataFrame>>,
    summary: &mut RunSummary,
) {
    for (form_type, frames) in collected {
        let key = PartitionKey::form_type(&form_type);
        let outcome = stack_frames(frames)
            .map(|frame| Batch::new(key.clone(), frame))
            .and_then(|batch| engine.merge_file(&batch));
        match outcome {
            Ok(outcome) => summary.merges.push(outcome),
            Err(e) => {
                error!("Merging form type {} failed: {}", form_type, e);
                summary.record_error(form_type, e);
            }
        }
    }
}

/// Concatenate a form type's frames in archive-date order.
fn stack_frames(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let lazy: Vec<LazyFrame> = frames.into_iter().map(|frame| frame.lazy()).collect();
    concat(lazy, UnionArgs::default())
        .and_then(|lf| lf.collect())
        .map_err(|e| {
            crate::error::IngestError::Format(format!("stacking form-type batches: {}", e))
        })
}
