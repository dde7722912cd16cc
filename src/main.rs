use anyhow::Result;
use clap::{Parser, Subcommand};
use fec_ingest::merge::MergeEngine;
use fec_ingest::s3::S3Client;
use fec_ingest::table_store::TableStore;
use fec_ingest::window::{self, AutoConfirm, Confirm};
use fec_ingest::{pipeline, Config};
use std::io::Write;
use tracing::info;

#[derive(Parser)]
#[command(name = "fec-ingest")]
#[command(about = "Ingest FEC disclosure filings into deduplicated columnar stores")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and merge the yearly bulk archives, one per category
    Bulk,

    /// Download and merge daily electronic-filing archives
    Incremental {
        /// First archive date to consider, YYYYMMDD (default: today, EST)
        #[arg(long)]
        start_date: Option<String>,

        /// Proceed without asking, even for large download windows
        #[arg(long)]
        yes: bool,

        /// Path to the fastfec binary used to parse .fec filings
        #[arg(long, default_value = "fastfec")]
        fastfec: String,
    },
}

/// Interactive gate: prints the projected volume and reads y/n from stdin.
struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, total_bytes: u64, archive_count: usize) -> bool {
        let gb = total_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        print!(
            "This will download {:.2} GB across {} archive(s). Continue? (y/n): ",
            gb, archive_count
        );
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env();
    let http = reqwest::Client::new();

    let tables = TableStore::open(&config.db_path)?;
    let mut engine = MergeEngine::new(tables, config.parquet_dir.clone());

    let summary = match args.command {
        Command::Bulk => pipeline::run_bulk(&config, &http, &mut engine).await?,
        Command::Incremental {
            start_date,
            yes,
            fastfec,
        } => {
            let start_date = match start_date {
                Some(s) => chrono::NaiveDate::parse_from_str(&s, "%Y%m%d")
                    .map_err(|e| anyhow::anyhow!("invalid --start-date '{}': {}", s, e))?,
                None => window::default_start_date(),
            };
            let store = S3Client::new(http.clone(), &config.s3_bucket, &config.s3_region);
            let confirm: Box<dyn Confirm> = if yes {
                Box::new(AutoConfirm)
            } else {
                Box::new(PromptConfirm)
            };
            pipeline::run_incremental(
                &config,
                &store,
                confirm.as_ref(),
                &mut engine,
                start_date,
                &fastfec,
            )
            .await?
        }
    };

    info!(
        "Run finished: {} merge(s), {} row(s) added, {} error(s)",
        summary.merges.len(),
        summary.rows_added(),
        summary.errors.len()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
