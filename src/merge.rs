//! The incremental deduplicating merge engine
//!
//! Folds batches into durable partitions without ever duplicating a record,
//! no matter how many times the same or overlapping source archive is
//! re-ingested. Row identity is full-tuple equality over every field; there
//! is no primary key. Both store shapes use the same algorithm: the set of
//! genuinely new rows is `distinct(batch) \ existing`, and only those rows
//! are committed, so merging is idempotent and order-convergent.
//!
//! For the table shape the set difference is delegated to the relational
//! engine (`INSERT ... SELECT DISTINCT ... EXCEPT ...` in one transaction).
//! For the file shape it is a stable union-dedup keeping first occurrence,
//! so previously persisted rows are never disturbed, followed by an atomic
//! file replace.

use crate::error::{IngestError, Result};
use crate::parquet_store;
use crate::partition::{Batch, MergeOutcome, PartitionKey};
use crate::table_store::TableStore;
use polars::prelude::*;
use std::path::PathBuf;
use tracing::info;

pub struct MergeEngine {
    tables: TableStore,
    parquet_dir: PathBuf,
}

impl MergeEngine {
    pub fn new(tables: TableStore, parquet_dir: PathBuf) -> Self {
        Self {
            tables,
            parquet_dir,
        }
    }

    /// Merge one batch into its relational partition.
    ///
    /// Creates the schema namespace and table on first use. Schema mismatch
    /// fails before any write; an empty batch is a no-op.
    pub fn merge_table(&mut self, batch: &Batch) -> Result<MergeOutcome> {
        batch.key.validate()?;
        let schema = batch.key.schema_name().to_string();
        let table = batch.key.table_name();

        self.tables.ensure_schema(&schema)?;
        let existing_columns = self.tables.table_columns(&schema, &table)?;

        let rows_before = match &existing_columns {
            Some(columns) => {
                batch.validate_schema(columns)?;
                self.tables.row_count(&schema, &table)?
            }
            None => 0,
        };

        if batch.is_empty() {
            return Ok(MergeOutcome::new(&batch.key, rows_before, rows_before));
        }

        self.tables.append_distinct(&schema, &table, &batch.frame)?;
        let rows_after = self.tables.row_count(&schema, &table)?;

        let outcome = MergeOutcome::new(&batch.key, rows_before, rows_after);
        info!(
            "Merged partition {}: {} -> {} rows (+{})",
            outcome.partition_key, outcome.rows_before, outcome.rows_after, outcome.rows_added
        );
        Ok(outcome)
    }

    /// Merge one batch into its columnar-file partition.
    ///
    /// Same dedup guarantee as the table path: the persisted file always
    /// equals the deduplicated union of every row ever seen for the form
    /// type, with existing rows first and untouched. Re-running an archive
    /// that was already merged adds nothing.
    pub fn merge_file(&mut self, batch: &Batch) -> Result<MergeOutcome> {
        batch.key.validate()?;
        let path = batch.key.file_path(&self.parquet_dir);
        let existing = parquet_store::read_all(&path)?;

        let rows_before = match &existing {
            Some(frame) => {
                let columns: Vec<String> = frame
                    .get_column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                batch.validate_schema(&columns)?;
                frame.height()
            }
            None => 0,
        };

        if batch.is_empty() {
            return Ok(MergeOutcome::new(&batch.key, rows_before, rows_before));
        }

        let mut merged = match existing {
            Some(frame) => dedup_union(frame, batch.frame.clone())?,
            None => distinct(batch.frame.clone())?,
        };

        let rows_after = merged.height();
        // Nothing new: leave the file untouched rather than rewriting it.
        if rows_after != rows_before || rows_before == 0 {
            parquet_store::write_atomic(&path, &mut merged)?;
        }

        let outcome = MergeOutcome::new(&batch.key, rows_before, rows_after);
        info!(
            "Merged partition {}: {} -> {} rows (+{})",
            outcome.partition_key, outcome.rows_before, outcome.rows_after, outcome.rows_added
        );
        Ok(outcome)
    }

    /// Current durable row count for a partition, for observability.
    pub fn row_count(&mut self, key: &PartitionKey) -> Result<usize> {
        key.validate()?;
        match key {
            PartitionKey::CategoryYear { .. } => {
                let schema = key.schema_name();
                let table = key.table_name();
                self.tables.ensure_schema(schema)?;
                match self.tables.table_columns(schema, &table)? {
                    Some(_) => self.tables.row_count(schema, &table),
                    None => Ok(0),
                }
            }
            PartitionKey::FormType(_) => {
                let path = key.file_path(&self.parquet_dir);
                Ok(parquet_store::read_all(&path)?.map_or(0, |f| f.height()))
            }
        }
    }
}

/// Existing rows first and verbatim, then any batch rows not already present.
fn dedup_union(existing: DataFrame, incoming: DataFrame) -> Result<DataFrame> {
    concat(
        [existing.lazy(), incoming.lazy()],
        UnionArgs::default(),
    )
    .and_then(|lf| lf.unique_stable(None, UniqueKeepStrategy::First).collect())
    .map_err(|e| IngestError::StoreIo(format!("computing merged partition: {}", e)))
}

fn distinct(frame: DataFrame) -> Result<DataFrame> {
    frame
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()
        .map_err(|e| IngestError::StoreIo(format!("deduplicating batch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> MergeEngine {
        let tables = TableStore::open(&dir.path().join("fec.db")).unwrap();
        MergeEngine::new(tables, dir.path().join("parquet"))
    }

    fn table_batch(rows: &[(&str, &str)]) -> Batch {
        let a: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let b: Vec<&str> = rows.iter().map(|r| r.1).collect();
        Batch::new(
            PartitionKey::category_year("candidate_master", 2024),
            df!["A" => a, "B" => b].unwrap(),
        )
    }

    fn file_batch(rows: &[(&str, &str)]) -> Batch {
        let a: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let b: Vec<&str> = rows.iter().map(|r| r.1).collect();
        Batch::new(PartitionKey::form_type("SA17"), df!["A" => a, "B" => b].unwrap())
    }

    #[test]
    fn table_merge_dedups_against_existing_rows() {
        // Existing {(A,1),(B,2)}; batch [(B,2),(C,3),(C,3)] adds exactly one row
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);

        let first = table_batch(&[("A", "1"), ("B", "2")]);
        let outcome = engine.merge_table(&first).unwrap();
        assert_eq!((outcome.rows_before, outcome.rows_after), (0, 2));

        let second = table_batch(&[("B", "2"), ("C", "3"), ("C", "3")]);
        let outcome = engine.merge_table(&second).unwrap();
        assert_eq!(outcome.rows_added, 1);
        assert_eq!(outcome.rows_after, 3);
    }

    #[test]
    fn table_merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let batch = table_batch(&[("A", "1"), ("B", "2")]);

        engine.merge_table(&batch).unwrap();
        let again = engine.merge_table(&batch).unwrap();
        assert_eq!(again.rows_added, 0);
        assert_eq!(again.rows_after, 2);
    }

    #[test]
    fn table_merge_rejects_schema_drift_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine.merge_table(&table_batch(&[("A", "1")])).unwrap();

        let drifted = Batch::new(
            PartitionKey::category_year("candidate_master", 2024),
            df!["A" => ["1"], "C" => ["9"]].unwrap(),
        );
        let err = engine.merge_table(&drifted).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));

        // Store unchanged
        let count = engine
            .row_count(&PartitionKey::category_year("candidate_master", 2024))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine.merge_table(&table_batch(&[("A", "1")])).unwrap();

        let empty = Batch::new(
            PartitionKey::category_year("candidate_master", 2024),
            df!["A" => Vec::<&str>::new(), "B" => Vec::<&str>::new()].unwrap(),
        );
        let outcome = engine.merge_table(&empty).unwrap();
        assert_eq!(outcome.rows_added, 0);
        assert_eq!(outcome.rows_after, 1);
    }

    #[test]
    fn file_merge_is_idempotent_and_dedups_within_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        let batch = file_batch(&[("x", "1"), ("x", "1"), ("y", "2")]);

        let outcome = engine.merge_file(&batch).unwrap();
        assert_eq!(outcome.rows_after, 2);

        let again = engine.merge_file(&batch).unwrap();
        assert_eq!(again.rows_added, 0);
        assert_eq!(again.rows_after, 2);
    }

    #[test]
    fn file_merge_converges_regardless_of_batch_order() {
        let b1 = [("x", "1"), ("y", "2")];
        let b2 = [("y", "2"), ("z", "3")];

        let dir_a = tempfile::tempdir().unwrap();
        let mut eng_a = engine(&dir_a);
        eng_a.merge_file(&file_batch(&b1)).unwrap();
        let a = eng_a.merge_file(&file_batch(&b2)).unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let mut eng_b = engine(&dir_b);
        eng_b.merge_file(&file_batch(&b2)).unwrap();
        let b = eng_b.merge_file(&file_batch(&b1)).unwrap();

        assert_eq!(a.rows_after, 3);
        assert_eq!(b.rows_after, 3);
    }

    #[test]
    fn file_merge_preserves_existing_rows_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine.merge_file(&file_batch(&[("x", "1"), ("y", "2")])).unwrap();
        engine.merge_file(&file_batch(&[("z", "3"), ("x", "1")])).unwrap();

        let path = PartitionKey::form_type("SA17").file_path(&dir.path().join("parquet"));
        let frame = crate::parquet_store::read_all(&path).unwrap().unwrap();
        let col_a: Vec<Option<&str>> = frame.column("A").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(col_a, vec![Some("x"), Some("y"), Some("z")]);
    }

    #[test]
    fn file_merge_shrinks_an_adopted_file_with_duplicates() {
        // A file inherited from an earlier pipeline may already contain
        // duplicate rows; merging dedups it and the delta stays at zero
        let dir = tempfile::tempdir().unwrap();
        let parquet_dir = dir.path().join("parquet");
        let path = PartitionKey::form_type("SA17").file_path(&parquet_dir);
        let mut dirty = df!["A" => ["x", "x", "y"], "B" => ["1", "1", "2"]].unwrap();
        crate::parquet_store::write_atomic(&path, &mut dirty).unwrap();

        let mut engine = engine(&dir);
        let outcome = engine.merge_file(&file_batch(&[("x", "1")])).unwrap();

        assert_eq!(outcome.rows_before, 3);
        assert_eq!(outcome.rows_after, 2);
        assert_eq!(outcome.rows_added, 0);
        let frame = crate::parquet_store::read_all(&path).unwrap().unwrap();
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn file_merge_rejects_schema_drift() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir);
        engine.merge_file(&file_batch(&[("x", "1")])).unwrap();

        let drifted = Batch::new(
            PartitionKey::form_type("SA17"),
            df!["B" => ["1"], "A" => ["x"]].unwrap(),
        );
        let err = engine.merge_file(&drifted).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert_eq!(engine.row_count(&PartitionKey::form_type("SA17")).unwrap(), 1);
    }
}
