use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod db;
mod error;
mod importer;
mod models;
mod parser;
mod pool;
mod report;
mod store;
mod trend;
mod watcher;

use importer::{Importer, ImporterConfig};
use pool::WorkerPool;
use store::{preceding_monthly_averages, VoteStore};

#[derive(Parser)]
#[command(name = "tuneheaven-trends")]
#[command(about = "Imports daily song votes and exports monthly trend reports", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    /// Persistence workers; defaults to the available parallelism
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,
    /// Extra attempts for a failed partition write
    #[arg(long, env = "SAVE_RETRIES", default_value_t = 0)]
    save_retries: usize,
    /// Directory for month-end reports; defaults to the vote file's directory
    #[arg(long, env = "REPORT_DIR")]
    report_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Watch a directory and import vote files as they arrive
    Watch {
        #[arg(long, env = "VOTE_FILE_LOCATION")]
        dir: PathBuf,
    },
    /// Import a single vote file
    Import {
        file: PathBuf,
        /// Vote date; decoded from the file name when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Write the trend reports for the month ending at a date
    Export {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Average rating of a song between two dates (YYYYMMDD)
    Avg {
        song_id: String,
        #[arg(long, value_parser = parse_compact_date)]
        since: NaiveDate,
        #[arg(long, value_parser = parse_compact_date)]
        until: NaiveDate,
    },
    /// Monthly averages for the months preceding a date
    AvgMonths {
        song_id: String,
        #[arg(long, default_value_t = 3)]
        months: u32,
        #[arg(long)]
        from: Option<NaiveDate>,
    },
}

fn parse_compact_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|err| format!("expected YYYYMMDD: {err}"))
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store: Arc<dyn VoteStore> = Arc::new(db::PgVoteStore::new(pool.clone()));

    let workers = match cli.workers {
        Some(workers) => WorkerPool::new(workers),
        None => WorkerPool::with_available_parallelism(),
    };
    info!(workers = workers.size(), "worker pool ready");
    let importer = Importer::new(
        store.clone(),
        workers,
        ImporterConfig {
            report_dir: cli.report_dir,
            save_retries: cli.save_retries,
        },
    );

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await.context("failed to run migrations")?;
            println!("Schema ready.");
        }
        Commands::Watch { dir } => {
            let file_watcher = watcher::FileWatcher::start(&dir)
                .with_context(|| format!("failed to watch {}", dir.display()))?;
            let cancel = CancellationToken::new();
            let watch_loop = tokio::spawn(file_watcher.run(importer.clone(), cancel.clone()));

            tokio::signal::ctrl_c().await.context("failed to listen for shutdown")?;
            info!("shutdown requested");
            cancel.cancel();
            watch_loop.await.context("watch loop panicked")?;
            importer.shutdown().await;
        }
        Commands::Import { file, date } => {
            let date = match date {
                Some(date) => date,
                None => {
                    let file_name = file
                        .file_name()
                        .and_then(|name| name.to_str())
                        .context("vote file has no usable name")?;
                    watcher::decode_file_name(file_name)
                        .context("not a vote file name, pass --date")??
                }
            };

            let summary = importer.import_votes(date, &file).await?;
            importer.shutdown().await;

            println!(
                "Imported {} of {} votes from {} ({} lines rejected, {} partitions failed).",
                summary.persisted,
                summary.parsed,
                file.display(),
                summary.rejected.len(),
                summary.failed_partitions.len()
            );
            for rejected in &summary.rejected {
                println!("  line {}: {}", rejected.line, rejected.reason);
            }
            for failure in &summary.failed_partitions {
                println!(
                    "  partition {} ({} votes) failed: {}",
                    failure.index, failure.records, failure.error
                );
            }
            if summary.export_scheduled {
                println!("Month-end trend export triggered for {}.", summary.date);
            }
        }
        Commands::Export { date, out } => {
            let summary = importer.export_trends(date, &out).await?;
            for path in &summary.written {
                println!("Report written to {}.", path.display());
            }
            if !summary.failed.is_empty() {
                anyhow::bail!("{} report(s) could not be written", summary.failed.len());
            }
        }
        Commands::Avg {
            song_id,
            since,
            until,
        } => match store.average(&song_id, since, until).await? {
            Some(average) => println!("{average:.4}"),
            None => println!("No votes for {song_id} between {since} and {until}."),
        },
        Commands::AvgMonths {
            song_id,
            months,
            from,
        } => {
            let from = from.unwrap_or_else(|| Utc::now().date_naive());
            let averages = preceding_monthly_averages(store.as_ref(), &song_id, from, months).await?;
            println!("{}", serde_json::to_string_pretty(&averages)?);
        }
    }

    Ok(())
}
