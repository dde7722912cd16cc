//! Columnar partition store: one Parquet file per form type
//!
//! Read-all / write-all. Writes go to a temporary file in the same directory
//! and are moved into place with an atomic rename, so a crash mid-write
//! leaves the previous file intact and never a half-written one.

use crate::error::{IngestError, Result};
use polars::prelude::*;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Load the persisted frame for a partition, or `None` if no file exists yet.
pub fn read_all(path: &Path) -> Result<Option<DataFrame>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = fs::File::open(path)?;
    let frame = ParquetReader::new(file)
        .finish()
        .map_err(|e| IngestError::StoreIo(format!("reading {}: {}", path.display(), e)))?;
    Ok(Some(frame))
}

/// Persist `frame` at `path` via write-to-temporary-then-rename.
pub fn write_atomic(path: &Path, frame: &mut DataFrame) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| IngestError::StoreIo(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "partition.parquet".to_string())
    ));

    let result = (|| -> Result<()> {
        let tmp_file = fs::File::create(&tmp_path)?;
        ParquetWriter::new(tmp_file)
            .finish(frame)
            .map_err(|e| IngestError::StoreIo(format!("writing {}: {}", tmp_path.display(), e)))?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    } else {
        debug!("Persisted {} ({} rows)", path.display(), frame.height());
    }
    result
}
