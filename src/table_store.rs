//! Relational partition store backed by embedded SQLite
//!
//! One table per bulk partition, all columns TEXT, addressed as
//! `<schema>.<table>`. SQLite has no `CREATE SCHEMA`, so a namespace is an
//! attached database file (`<schema>.db` next to the main database), which
//! gives the same two-level addressing with if-not-exists semantics.
//!
//! The distinct-append is a single transaction delegating the set difference
//! to the SQL engine: `INSERT INTO t SELECT DISTINCT * FROM batch EXCEPT
//! SELECT * FROM t`. Compound set operators compare full tuples (NULLs
//! included), which is exactly the full-row identity the merge needs.

use crate::error::{IngestError, Result};
use polars::prelude::*;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct TableStore {
    conn: Connection,
    /// Directory where attached schema databases are created
    attach_dir: PathBuf,
}

impl TableStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(store_err)?;
        let attach_dir = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { conn, attach_dir })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(attach_dir: &Path) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self {
            conn,
            attach_dir: attach_dir.to_path_buf(),
        })
    }

    /// Attach the namespace database for `schema`, creating it if absent.
    pub fn ensure_schema(&self, schema: &str) -> Result<()> {
        let attached: Vec<String> = self
            .conn
            .prepare("PRAGMA database_list")
            .map_err(store_err)?
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(store_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(store_err)?;
        if attached.iter().any(|name| name == schema) {
            return Ok(());
        }
        let schema_path = self.attach_dir.join(format!("{}.db", schema));
        let schema_path_str = schema_path.to_string_lossy().into_owned();
        self.conn
            .execute(
                &format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)),
                [schema_path_str],
            )
            .map_err(store_err)?;
        debug!("Attached schema '{}' at {}", schema, schema_path.display());
        Ok(())
    }

    /// Column names of an existing table in file order, or `None` if the
    /// table does not exist yet.
    pub fn table_columns(&self, schema: &str, table: &str) -> Result<Option<Vec<String>>> {
        let sql = "SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid";
        let mut stmt = self.conn.prepare(sql).map_err(store_err)?;
        let columns: Vec<String> = stmt
            .query_map([table, schema], |row| row.get(0))
            .map_err(store_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(store_err)?;
        if columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(columns))
        }
    }

    pub fn row_count(&self, schema: &str, table: &str) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(schema),
            quote_ident(table)
        );
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as usize)
    }

    /// Append the distinct rows of `frame` that are not already in the table,
    /// creating the table on first use. One transaction: either every new
    /// row lands or none do.
    pub fn append_distinct(&mut self, schema: &str, table: &str, frame: &DataFrame) -> Result<()> {
        let columns = frame_columns(frame);
        let rows = frame_rows(frame)?;

        let tx = self.conn.transaction().map_err(store_err)?;

        let column_ddl = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.{} ({})",
                quote_ident(schema),
                quote_ident(table),
                column_ddl
            ),
            [],
        )
        .map_err(store_err)?;

        tx.execute(
            &format!("CREATE TEMP TABLE batch_rows ({})", column_ddl),
            [],
        )
        .map_err(store_err)?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        {
            let mut insert = tx
                .prepare(&format!("INSERT INTO temp.batch_rows VALUES ({})", placeholders))
                .map_err(store_err)?;
            for row in &rows {
                insert
                    .execute(params_from_iter(row.iter()))
                    .map_err(store_err)?;
            }
        }

        tx.execute(
            &format!(
                "INSERT INTO {schema}.{table} SELECT DISTINCT * FROM temp.batch_rows \
                 EXCEPT SELECT * FROM {schema}.{table}",
                schema = quote_ident(schema),
                table = quote_ident(table),
            ),
            [],
        )
        .map_err(store_err)?;

        tx.execute("DROP TABLE temp.batch_rows", []).map_err(store_err)?;
        tx.commit().map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> IngestError {
    IngestError::StoreIo(e.to_string())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn frame_columns(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Row-major view of an all-string frame for parameter binding.
fn frame_rows(frame: &DataFrame) -> Result<Vec<Vec<Option<String>>>> {
    let string_cols = frame
        .get_columns()
        .iter()
        .map(|s| {
            s.str().map_err(|_| {
                IngestError::Validation(format!(
                    "column '{}' is not a string column; all disclosure fields are raw text",
                    s.name()
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        rows.push(
            string_cols
                .iter()
                .map(|col| col.get(i).map(str::to_string))
                .collect(),
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_distinct_creates_and_dedups() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = TableStore::open_in_memory(dir.path())?;
        store.ensure_schema("raw")?;

        let frame = df!["A" => ["1", "1", "2"], "B" => ["x", "x", "y"]]?;
        store.append_distinct("raw", "t", &frame)?;
        assert_eq!(store.row_count("raw", "t")?, 2);

        // Same frame again is a no-op
        store.append_distinct("raw", "t", &frame)?;
        assert_eq!(store.row_count("raw", "t")?, 2);

        let columns = store.table_columns("raw", "t")?.unwrap();
        assert_eq!(columns, vec!["A".to_string(), "B".to_string()]);
        Ok(())
    }

    #[test]
    fn missing_table_has_no_columns() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = TableStore::open_in_memory(dir.path())?;
        store.ensure_schema("raw")?;
        assert!(store.table_columns("raw", "nope")?.is_none());
        Ok(())
    }
}
