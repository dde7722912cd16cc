//! Partition keys, batches, and merge outcomes
//!
//! A partition is one logical durable dataset: a bulk category for one
//! reporting year (backed by a relational table) or one electronic form type
//! (backed by a Parquet file). Batches are ephemeral all-string frames tagged
//! with the partition they belong to.

use crate::error::{IngestError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifies one logical durable dataset.
///
/// The key determines the physical target: bulk categories map to a table in
/// the `raw` schema, form types map to a Parquet file. Keys are never reused
/// across schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// Bulk archive partition: one category for one reporting year
    CategoryYear { category: String, year: u16 },

    /// Electronic-filing partition: one form type (e.g. `SA17`, `F3`)
    FormType(String),
}

impl PartitionKey {
    pub fn category_year(category: impl Into<String>, year: u16) -> Self {
        Self::CategoryYear {
            category: category.into(),
            year,
        }
    }

    pub fn form_type(form_type: impl Into<String>) -> Self {
        Self::FormType(form_type.into())
    }

    /// Schema namespace for the table-shaped store.
    pub fn schema_name(&self) -> &str {
        "raw"
    }

    /// Target table name for the table-shaped store.
    pub fn table_name(&self) -> String {
        match self {
            Self::CategoryYear { category, .. } => format!("raw_{}", category),
            Self::FormType(form_type) => format!("raw_{}", form_type.to_lowercase()),
        }
    }

    /// Target file path for the file-shaped store.
    pub fn file_path(&self, parquet_dir: &Path) -> PathBuf {
        match self {
            Self::CategoryYear { category, year } => {
                parquet_dir.join(format!("{}_{}.parquet", category, year))
            }
            Self::FormType(form_type) => parquet_dir.join(format!("{}.parquet", form_type)),
        }
    }

    /// Reject keys that cannot name a table or file.
    ///
    /// Identifiers are restricted to alphanumerics and underscores so the key
    /// can be spliced into DDL and paths without quoting games.
    pub fn validate(&self) -> Result<()> {
        let name = match self {
            Self::CategoryYear { category, .. } => category.as_str(),
            Self::FormType(form_type) => form_type.as_str(),
        };
        if name.is_empty() {
            return Err(IngestError::Validation(
                "partition key must not be empty".to_string(),
            ));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IngestError::Validation(format!(
                "partition key '{}' contains characters outside [A-Za-z0-9_]",
                name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CategoryYear { category, year } => write!(f, "{}/{}", category, year),
            Self::FormType(form_type) => write!(f, "{}", form_type),
        }
    }
}

/// One schema-consistent set of parsed rows, ready for merging.
///
/// All columns are strings: values are preserved as raw disclosure text and
/// type coercion is out of scope. A batch is constructed by a source,
/// consumed exactly once by the merge engine, then discarded.
#[derive(Debug, Clone)]
pub struct Batch {
    /// The rows, one string column per field
    pub frame: DataFrame,

    /// Partition this batch belongs to
    pub key: PartitionKey,

    /// Identity of the producing archive (e.g. its 8-digit date). Used only
    /// for window selection and logging, never for row identity.
    pub fingerprint: Option<String>,
}

impl Batch {
    pub fn new(key: PartitionKey, frame: DataFrame) -> Self {
        Self {
            frame,
            key,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Ordered column names; field order is part of the schema.
    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Fail if this batch's field set or order differs from the schema an
    /// existing store was created with. Never coerced.
    pub fn validate_schema(&self, expected: &[String]) -> Result<()> {
        let actual = self.columns();
        if actual != expected {
            return Err(IngestError::Validation(format!(
                "schema mismatch for partition {}: store has columns {:?}, batch has {:?}",
                self.key, expected, actual
            )));
        }
        Ok(())
    }
}

/// Observability record for one merge: `(partition, rows_before, rows_after,
/// rows_added)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub partition_key: String,
    pub rows_before: usize,
    pub rows_after: usize,
    pub rows_added: usize,
}

impl MergeOutcome {
    pub fn new(key: &PartitionKey, rows_before: usize, rows_after: usize) -> Self {
        Self {
            partition_key: key.to_string(),
            rows_before,
            rows_after,
            // A merge can shrink a store that was adopted with pre-existing
            // duplicates; the delta never goes negative
            rows_added: rows_after.saturating_sub(rows_before),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_key_names_table_and_file() {
        let key = PartitionKey::category_year("candidate_master", 2024);
        assert_eq!(key.table_name(), "raw_candidate_master");
        assert_eq!(
            key.file_path(Path::new("pq")),
            PathBuf::from("pq/candidate_master_2024.parquet")
        );
        assert!(key.validate().is_ok());
    }

    #[test]
    fn form_type_key_names_file() {
        let key = PartitionKey::form_type("SA17");
        assert_eq!(key.table_name(), "raw_sa17");
        assert_eq!(key.file_path(Path::new("pq")), PathBuf::from("pq/SA17.parquet"));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(PartitionKey::form_type("").validate().is_err());
        assert!(PartitionKey::form_type("sa; drop table").validate().is_err());
        assert!(PartitionKey::category_year("a-b", 2024).validate().is_err());
    }

    #[test]
    fn outcome_delta_never_goes_negative() {
        let key = PartitionKey::form_type("F3");
        let outcome = MergeOutcome::new(&key, 3, 2);
        assert_eq!(outcome.rows_added, 0);
        assert_eq!((outcome.rows_before, outcome.rows_after), (3, 2));
    }

    #[test]
    fn schema_validation_is_order_sensitive() {
        let frame = df!["A" => ["1"], "B" => ["2"]].unwrap();
        let batch = Batch::new(PartitionKey::form_type("F3"), frame);
        assert!(batch
            .validate_schema(&["A".to_string(), "B".to_string()])
            .is_ok());
        assert!(batch
            .validate_schema(&["B".to_string(), "A".to_string()])
            .is_err());
    }
}
