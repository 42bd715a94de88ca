use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::WriterBuilder;
use tracing::{error, info};

use crate::error::Result;
use crate::models::{month_label, ExportRecord};
use crate::trend::TrendReport;

pub const PREFIX_TRENDING: &str = "trending100songs-";
pub const PREFIX_LOSING: &str = "songs-loosing-";
pub const SUFFIX: &str = ".csv";

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub fn report_path(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{prefix}{}{SUFFIX}", month_label(date)))
}

/// Writes both monthly reports. A failure on one file is logged and does not
/// stop the other from being written.
pub fn write_trend_reports(dir: &Path, date: NaiveDate, report: &TrendReport) -> ExportSummary {
    let mut summary = ExportSummary::default();

    for (prefix, records) in [
        (PREFIX_TRENDING, &report.trending),
        (PREFIX_LOSING, &report.losing),
    ] {
        let path = report_path(dir, prefix, date);
        match write_records(&path, records) {
            Ok(()) => {
                info!(path = %path.display(), rows = records.len(), "report written");
                summary.written.push(path);
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to write report");
                summary.failed.push(path);
            }
        }
    }

    summary
}

pub fn write_records(path: &Path, records: &[ExportRecord]) -> Result<()> {
    // Header is written explicitly so empty reports still carry it.
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record([
        "song_name",
        "song_uuid",
        "rating_this_month",
        "rating_previous_month",
        "rating_2months_back",
    ])?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
