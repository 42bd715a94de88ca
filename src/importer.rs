use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::is_last_day_of_month;
use crate::parser::{self, RejectedLine};
use crate::pool::{PartitionFailure, WorkerPool};
use crate::report::{self, ExportSummary};
use crate::store::VoteStore;
use crate::trend;

#[derive(Debug, Clone, Default)]
pub struct ImporterConfig {
    /// Where month-end reports go; defaults to the imported file's directory.
    pub report_dir: Option<PathBuf>,
    pub save_retries: usize,
}

#[derive(Debug)]
pub struct ImportSummary {
    pub date: NaiveDate,
    pub parsed: usize,
    pub rejected: Vec<RejectedLine>,
    pub persisted: usize,
    pub failed_partitions: Vec<PartitionFailure>,
    pub export_scheduled: bool,
}

/// Parses vote files, persists them through the shared worker pool and kicks
/// off the trend export when a month's last daily file arrives.
#[derive(Clone)]
pub struct Importer {
    store: Arc<dyn VoteStore>,
    pool: WorkerPool,
    tasks: TaskTracker,
    config: Arc<ImporterConfig>,
}

impl Importer {
    pub fn new(store: Arc<dyn VoteStore>, pool: WorkerPool, config: ImporterConfig) -> Self {
        Self {
            store,
            pool,
            tasks: TaskTracker::new(),
            config: Arc::new(config),
        }
    }

    pub async fn import_votes(&self, date: NaiveDate, path: &Path) -> Result<ImportSummary> {
        let file = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || parser::read_votes_from_file(date, &file))
            .await
            .map_err(|err| Error::Task(err.to_string()))??;
        let parsed_count = parsed.records.len();

        let persisted = self
            .pool
            .persist_partitioned(self.store.clone(), parsed.records, self.config.save_retries)
            .await;

        let export_scheduled = is_last_day_of_month(date);
        if export_scheduled {
            self.spawn_export(date, self.report_dir_for(path));
        }

        Ok(ImportSummary {
            date,
            parsed: parsed_count,
            rejected: parsed.rejected,
            persisted: persisted.persisted,
            failed_partitions: persisted.failures,
            export_scheduled,
        })
    }

    /// Submits an import without waiting for it. Returns `false` once the
    /// importer is shutting down.
    pub fn spawn_import(&self, date: NaiveDate, path: PathBuf) -> bool {
        if self.tasks.is_closed() {
            warn!(path = %path.display(), "importer is shutting down, file not imported");
            return false;
        }

        let importer = self.clone();
        self.tasks.spawn(async move {
            match importer.import_votes(date, &path).await {
                Ok(summary) => {
                    if !summary.failed_partitions.is_empty() {
                        error!(
                            path = %path.display(),
                            failed_partitions = summary.failed_partitions.len(),
                            "vote import incomplete"
                        );
                    }
                    info!(
                        path = %path.display(),
                        %date,
                        parsed = summary.parsed,
                        rejected = summary.rejected.len(),
                        persisted = summary.persisted,
                        export = summary.export_scheduled,
                        "vote import finished"
                    );
                }
                Err(err) => error!(path = %path.display(), error = %err, "vote import failed"),
            }
        });
        true
    }

    pub fn spawn_export(&self, date: NaiveDate, dir: PathBuf) {
        let importer = self.clone();
        self.tasks.spawn(async move {
            if let Err(err) = importer.export_trends(date, &dir).await {
                error!(%date, dir = %dir.display(), error = %err, "trend export failed");
            }
        });
    }

    pub async fn export_trends(&self, date: NaiveDate, dir: &Path) -> Result<ExportSummary> {
        info!(%date, dir = %dir.display(), "exporting trends");
        let report = trend::build_trend_report(self.store.as_ref(), date).await?;
        let dir = dir.to_path_buf();

        tokio::task::spawn_blocking(move || report::write_trend_reports(&dir, date, &report))
            .await
            .map_err(|err| Error::Task(err.to_string()))
    }

    /// Stops accepting new imports, then waits for in-flight imports, exports
    /// and partition writes.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.pool.drain().await;
        info!("importer drained");
    }

    fn report_dir_for(&self, path: &Path) -> PathBuf {
        self.config
            .report_dir
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
