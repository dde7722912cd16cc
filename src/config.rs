//! Runtime configuration and bulk category metadata
//!
//! Everything tunable comes from environment variables (with defaults), so a
//! `.env` file is enough to repoint the pipeline at another bucket or data
//! directory. The bulk category table is static: the FEC publishes one
//! fixed-layout archive per category per election cycle, and the column
//! headers are part of the published file description, not of the data.

use std::env;
use std::path::PathBuf;

/// Runtime configuration, constructed once in `main` and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all local state
    pub data_dir: PathBuf,

    /// SQLite database file backing the table-shaped partitions
    pub db_path: PathBuf,

    /// Directory holding one Parquet file per electronic form type
    pub parquet_dir: PathBuf,

    /// Directory for downloaded daily archives
    pub download_dir: PathBuf,

    /// Base URL for bulk archive downloads
    pub bulk_base_url: String,

    /// Public S3 bucket holding the daily electronic-filing archives
    pub s3_bucket: String,

    /// Region of the public bucket
    pub s3_region: String,

    /// Key prefix under which the daily `<YYYYMMDD>.zip` archives live
    pub electronic_prefix: String,

    /// Projected download volume above which an explicit confirmation is
    /// required before the incremental run proceeds
    pub confirm_threshold_bytes: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("FEC_DATA_DIR", "data"));
        Self {
            db_path: data_dir.join(env_or("FEC_DB_FILE", "fec.db")),
            parquet_dir: data_dir.join("electronic_parquet"),
            download_dir: data_dir.join("electronic_zip"),
            data_dir,
            bulk_base_url: env_or(
                "FEC_BULK_BASE_URL",
                "https://www.fec.gov/files/bulk-downloads/",
            ),
            s3_bucket: env_or(
                "FEC_S3_BUCKET",
                "cg-519a459a-0ea3-42c2-b7bc-fa1143481f74",
            ),
            s3_region: env_or("FEC_S3_REGION", "us-gov-west-1"),
            electronic_prefix: env_or("FEC_ELECTRONIC_PREFIX", "bulk-downloads/electronic/"),
            confirm_threshold_bytes: env_or("FEC_CONFIRM_THRESHOLD_BYTES", "1073741824")
                .parse()
                .unwrap_or(1 << 30),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// One bulk category: a yearly fixed-schema archive published by the FEC.
#[derive(Debug, Clone)]
pub struct CategorySpec {
    /// Stable category name, used in the partition key and table name
    pub category: &'static str,

    /// Reporting year the archive covers
    pub year: u16,

    /// URL remainder appended to the bulk base URL
    pub remainder: &'static str,

    /// Column headers of the pipe-delimited payload, in file order
    pub columns: &'static [&'static str],
}

/// Bulk categories ingested by the `bulk` subcommand, one archive each.
pub fn bulk_categories() -> Vec<CategorySpec> {
    vec![
        CategorySpec {
            category: "candidate_master",
            year: 2024,
            remainder: "2024/cn24.zip",
            columns: CANDIDATE_MASTER_COLUMNS,
        },
        CategorySpec {
            category: "committee_master",
            year: 2024,
            remainder: "2024/cm24.zip",
            columns: COMMITTEE_MASTER_COLUMNS,
        },
        CategorySpec {
            category: "candidate_summary",
            year: 2024,
            remainder: "2024/weball24.zip",
            columns: CANDIDATE_SUMMARY_COLUMNS,
        },
        CategorySpec {
            category: "committee_summary",
            year: 2024,
            remainder: "2024/webk24.zip",
            columns: COMMITTEE_SUMMARY_COLUMNS,
        },
    ]
}

pub const CANDIDATE_MASTER_COLUMNS: &[&str] = &[
    "CAND_ID",
    "CAND_NAME",
    "CAND_PTY_AFFILIATION",
    "CAND_ELECTION_YR",
    "CAND_OFFICE_ST",
    "CAND_OFFICE",
    "CAND_OFFICE_DISTRICT",
    "CAND_ICI",
    "CAND_STATUS",
    "CAND_PCC",
    "CAND_ST1",
    "CAND_ST2",
    "CAND_CITY",
    "CAND_ST",
    "CAND_ZIP",
];

pub const COMMITTEE_MASTER_COLUMNS: &[&str] = &[
    "CMTE_ID",
    "CMTE_NM",
    "TRES_NM",
    "CMTE_ST1",
    "CMTE_ST2",
    "CMTE_CITY",
    "CMTE_ST",
    "CMTE_ZIP",
    "CMTE_DSGN",
    "CMTE_TP",
    "CMTE_PTY_AFFILIATION",
    "CMTE_FILING_FREQ",
    "ORG_TP",
    "CONNECTED_ORG_NM",
    "CAND_ID",
];

pub const CANDIDATE_SUMMARY_COLUMNS: &[&str] = &[
    "CAND_ID",
    "CAND_NAME",
    "CAND_ICI",
    "PTY_CD",
    "CAND_PTY_AFFILIATION",
    "TTL_RECEIPTS",
    "TRANS_FROM_AUTH",
    "TTL_DISB",
    "TRANS_TO_AUTH",
    "COH_BOP",
    "COH_COP",
    "CAND_CONTRIB",
    "CAND_LOANS",
    "OTHER_LOANS",
    "CAND_LOAN_REPAY",
    "OTHER_LOAN_REPAY",
    "DEBTS_OWED_BY",
    "TTL_INDIV_CONTRIB",
    "CAND_OFFICE_ST",
    "CAND_OFFICE_DISTRICT",
    "SPEC_ELECTION",
    "PRIM_ELECTION",
    "RUN_ELECTION",
    "GEN_ELECTION",
    "GEN_ELECTION_PRECENT",
    "OTHER_POL_CMTE_CONTRIB",
    "POL_PTY_CONTRIB",
    "CVG_END_DT",
    "INDIV_REFUNDS",
    "CMTE_REFUNDS",
];

pub const COMMITTEE_SUMMARY_COLUMNS: &[&str] = &[
    "CMTE_ID",
    "CMTE_NM",
    "CMTE_TP",
    "CMTE_DSGN",
    "CMTE_FILING_FREQ",
    "TTL_RECEIPTS",
    "TRANS_FROM_AFF",
    "INDV_CONTRIB",
    "OTHER_POL_CMTE_CONTRIB",
    "CAND_CONTRIB",
    "CAND_LOANS",
    "TTL_LOANS_RECEIVED",
    "TTL_DISB",
    "TRANF_TO_AFF",
    "INDV_REFUNDS",
    "OTHER_POL_CMTE_REFUNDS",
    "CAND_LOAN_REPAY",
    "LOAN_REPAY",
    "COH_BOP",
    "COH_COP",
    "DEBTS_OWED_BY",
    "NONFED_TRANS_RECEIVED",
    "CONTRIB_TO_OTHER_CMTES",
    "IND_EXP",
    "PTY_COORD_EXP",
    "NONFED_SHARE_EXP",
    "CVG_END_DT",
];
