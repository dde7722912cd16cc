//! FEC disclosure ingestion pipeline
//!
//! Ingests campaign-finance disclosure filings in two shapes - yearly bulk
//! archives per category and daily electronic-filing archives - and folds
//! both into durable, deduplicated columnar partitions. The merge engine
//! guarantees that re-ingesting the same or overlapping archives never
//! duplicates a row: partition contents always equal the deduplicated union
//! of every row ever seen.

pub mod archive;
pub mod config;
pub mod error;
pub mod merge;
pub mod parquet_store;
pub mod partition;
pub mod pipeline;
pub mod s3;
pub mod source;
pub mod table_store;
pub mod window;

pub use config::Config;
pub use error::{IngestError, Result};
pub use merge::MergeEngine;
pub use partition::{Batch, MergeOutcome, PartitionKey};
pub use pipeline::RunSummary;
pub use window::{Confirm, IncrementalWindowSelector, ObjectStore};
