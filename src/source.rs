//! Batch sources: bulk fixed-schema text and electronic `.fec` filings
//!
//! Both producers yield all-string frames tagged with a partition key. The
//! bulk producer reads the header-less pipe-delimited payload of a category
//! archive against the category's published column set. The incremental
//! producer shells out to `fastfec` to explode each proprietary `.fec` filing
//! into per-form-type CSVs, then collects the non-empty ones per form type.

use crate::error::{IngestError, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Full paths of files in `directory` with the given extension (no recursion).
pub fn list_files_by_type(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let wanted = extension.trim_start_matches('.').to_lowercase();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase() == wanted)
            .unwrap_or(false);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse a bulk category payload: header-less, pipe-delimited, every field
/// kept as raw text. The file's arity must match the category's column set.
pub fn read_bulk_text(txt_path: &Path, columns: &[&str]) -> Result<DataFrame> {
    let mut frame = LazyCsvReader::new(txt_path)
        .with_has_header(false)
        .with_separator(b'|')
        .with_infer_schema_length(Some(0))
        .with_truncate_ragged_lines(true)
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| {
            IngestError::Format(format!("parsing {}: {}", txt_path.display(), e))
        })?;

    if frame.width() != columns.len() {
        return Err(IngestError::Format(format!(
            "{} has {} fields per row, expected {}",
            txt_path.display(),
            frame.width(),
            columns.len()
        )));
    }
    frame
        .set_column_names(columns)
        .map_err(|e| IngestError::Format(e.to_string()))?;
    Ok(frame)
}

/// Runs the external `fastfec` binary over extracted `.fec` filings.
pub struct FilingParser {
    fastfec_bin: String,
    /// Root under which fastfec writes one CSV directory per filing
    csv_dir: PathBuf,
}

impl FilingParser {
    pub fn new(fastfec_bin: impl Into<String>, csv_dir: PathBuf) -> Self {
        Self {
            fastfec_bin: fastfec_bin.into(),
            csv_dir,
        }
    }

    /// Parse every `.fec` filing in `extract_dir` and return one frame per
    /// form type, with all filings of a form type concatenated.
    ///
    /// A filing that fails to parse is recorded in `errors` and skipped; it
    /// never aborts the archive. Zero-byte CSVs (form types fastfec emits a
    /// placeholder for) are ignored.
    pub fn parse_archive(&self, extract_dir: &Path) -> Result<ArchiveBatches> {
        let filings = list_files_by_type(extract_dir, "fec")?;
        info!("Parsing {} filing(s) from {}", filings.len(), extract_dir.display());

        let mut csv_files_by_form_type: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut errors = Vec::new();

        for filing in &filings {
            match self.collect_filing_csvs(filing) {
                Ok(csv_files) => {
                    for (form_type, csv_file) in csv_files {
                        csv_files_by_form_type
                            .entry(form_type)
                            .or_default()
                            .push(csv_file);
                    }
                }
                Err(e) => {
                    warn!("Error parsing {}: {}", filing.display(), e);
                    errors.push((filing.display().to_string(), e.to_string()));
                }
            }
        }

        let mut frames = BTreeMap::new();
        for (form_type, csv_files) in csv_files_by_form_type {
            match concat_csvs(&csv_files) {
                Ok(frame) => {
                    frames.insert(form_type, frame);
                }
                Err(e) => {
                    warn!("Error assembling form type {}: {}", form_type, e);
                    errors.push((form_type, e.to_string()));
                }
            }
        }
        Ok(ArchiveBatches { frames, errors })
    }

    /// Convert one filing and gather its non-empty per-form-type CSVs.
    ///
    /// Any failure here - conversion, listing, or stat - belongs to this
    /// filing alone and is recorded by the caller without touching the
    /// archive's other filings.
    fn collect_filing_csvs(&self, filing: &Path) -> Result<Vec<(String, PathBuf)>> {
        let output_dir = self.convert_filing(filing)?;
        let mut csv_files = Vec::new();
        for csv_file in list_files_by_type(&output_dir, "csv")? {
            if std::fs::metadata(&csv_file)?.len() == 0 {
                continue;
            }
            let form_type = csv_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            csv_files.push((form_type, csv_file));
        }
        Ok(csv_files)
    }

    /// Convert one filing, reusing a previous conversion when present.
    fn convert_filing(&self, fec_file: &Path) -> Result<PathBuf> {
        let fec_id = fec_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                IngestError::Format(format!("filing has no stem: {}", fec_file.display()))
            })?;
        let output_dir = self.csv_dir.join(&fec_id);

        if output_dir.exists() {
            debug!("Skipping {} - already converted", fec_id);
            return Ok(output_dir);
        }

        std::fs::create_dir_all(&self.csv_dir)?;
        let status = Command::new(&self.fastfec_bin)
            .arg(fec_file)
            .arg(&self.csv_dir)
            .status()
            .map_err(|e| {
                IngestError::Format(format!("running {}: {}", self.fastfec_bin, e))
            })?;
        if !status.success() {
            return Err(IngestError::Format(format!(
                "{} exited with {} for {}",
                self.fastfec_bin,
                status,
                fec_file.display()
            )));
        }
        Ok(output_dir)
    }
}

/// Per-form-type frames parsed from one archive, plus per-filing errors.
#[derive(Debug, Default)]
pub struct ArchiveBatches {
    pub frames: BTreeMap<String, DataFrame>,
    pub errors: Vec<(String, String)>,
}

/// Read fastfec CSVs (headered, every column raw text) and stack them.
fn concat_csvs(csv_files: &[PathBuf]) -> Result<DataFrame> {
    let lazy_frames = csv_files
        .iter()
        .map(|csv_file| {
            LazyCsvReader::new(csv_file)
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_truncate_ragged_lines(true)
                .finish()
                .map_err(|e| {
                    IngestError::Format(format!("reading {}: {}", csv_file.display(), e))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    concat(lazy_frames, UnionArgs::default())
        .and_then(|lf| lf.collect())
        .map_err(|e| IngestError::Format(format!("stacking form-type CSVs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_text_is_parsed_with_category_columns(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let txt = dir.path().join("cn.txt");
        std::fs::write(&txt, "H0AK00097|COX, JOHN R.|REP\nH0AK00105|DOE, JANE|DEM\n")?;

        let frame = read_bulk_text(&txt, &["CAND_ID", "CAND_NAME", "CAND_PTY_AFFILIATION"])?;
        assert_eq!(frame.height(), 2);
        assert_eq!(
            frame.get_column_names(),
            vec!["CAND_ID", "CAND_NAME", "CAND_PTY_AFFILIATION"]
        );
        // Values stay raw text
        let ids: Vec<Option<&str>> = frame.column("CAND_ID")?.str()?.into_iter().collect();
        assert_eq!(ids[0], Some("H0AK00097"));
        Ok(())
    }

    #[test]
    fn bulk_text_with_wrong_arity_is_a_format_error(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let txt = dir.path().join("cn.txt");
        std::fs::write(&txt, "a|b\nc|d\n")?;

        let err = read_bulk_text(&txt, &["ONE", "TWO", "THREE"]).unwrap_err();
        assert!(matches!(err, IngestError::Format(_)));
        Ok(())
    }

    #[test]
    fn lists_only_matching_extensions() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.fec"), "")?;
        std::fs::write(dir.path().join("b.FEC"), "")?;
        std::fs::write(dir.path().join("c.txt"), "")?;

        let files = list_files_by_type(dir.path(), "fec")?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn failed_fastfec_is_isolated_per_filing() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("123.fec"), "HDR")?;

        // A binary that does not exist: the filing is recorded as failed,
        // the archive result itself is still Ok
        let parser = FilingParser::new("fastfec-not-installed", dir.path().join("csv"));
        let batches = parser.parse_archive(dir.path())?;
        assert!(batches.frames.is_empty());
        assert_eq!(batches.errors.len(), 1);
        Ok(())
    }

    #[test]
    fn io_failure_on_one_filing_does_not_abort_the_archive(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("101.fec"), "HDR")?;
        std::fs::write(dir.path().join("102.fec"), "HDR")?;

        let csv_dir = dir.path().join("csv");
        // The first filing's conversion slot is a plain file, so listing its
        // CSVs fails with an IO error for that filing only
        std::fs::create_dir_all(&csv_dir)?;
        std::fs::write(csv_dir.join("101"), "not a directory")?;
        let good = csv_dir.join("102");
        std::fs::create_dir_all(&good)?;
        std::fs::write(good.join("SA17.csv"), "a,b\n1,2\n")?;

        let parser = FilingParser::new("fastfec-not-installed", csv_dir);
        let batches = parser.parse_archive(dir.path())?;

        assert_eq!(batches.errors.len(), 1);
        assert!(batches.errors[0].0.ends_with("101.fec"));
        assert_eq!(batches.frames["SA17"].height(), 1);
        Ok(())
    }

    #[test]
    fn preconverted_filings_are_collected_by_form_type(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("123.fec"), "HDR")?;

        // Simulate a previous fastfec run
        let out = dir.path().join("csv").join("123");
        std::fs::create_dir_all(&out)?;
        std::fs::write(out.join("SA17.csv"), "a,b\n1,2\n3,4\n")?;
        std::fs::write(out.join("F3.csv"), "x\nhello\n")?;
        std::fs::write(out.join("SB23.csv"), "")?; // placeholder, ignored

        let parser = FilingParser::new("fastfec-not-installed", dir.path().join("csv"));
        let batches = parser.parse_archive(dir.path())?;
        assert!(batches.errors.is_empty());
        assert_eq!(batches.frames.len(), 2);
        assert_eq!(batches.frames["SA17"].height(), 2);
        assert_eq!(batches.frames["F3"].height(), 1);
        Ok(())
    }
}
