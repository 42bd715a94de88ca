use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{months_before, MonthRange, MonthWindow, MonthlyAverage, TrendRow, VoteRecord};
use crate::trend;

#[cfg(test)]
pub mod memory;

/// Durable vote storage plus the aggregate queries the trend pipeline needs.
/// Implementations must tolerate concurrent `save_all` calls.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Persists the batch and returns how many records were written.
    async fn save_all(&self, records: &[VoteRecord]) -> Result<usize>;

    /// Mean rating of a song over the inclusive date range, `None` without votes.
    async fn average(&self, song_id: &str, since: NaiveDate, until: NaiveDate) -> Result<Option<f64>>;

    async fn distinct_song_ids(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<String>>;

    async fn first_record_for_song(&self, song_id: &str) -> Result<Option<VoteRecord>>;

    /// One row per song with a vote anywhere in the window, ordered by
    /// increase desc, month1 average desc, song id asc.
    async fn three_month_buckets(&self, window: &MonthWindow) -> Result<Vec<TrendRow>> {
        let song_ids = self.distinct_song_ids(window.start(), window.end()).await?;
        let mut rows = Vec::with_capacity(song_ids.len());

        for song_id in song_ids {
            let avg_month1 = self.average(&song_id, window.month1.start, window.month1.end).await?;
            let avg_month2 = self.average(&song_id, window.month2.start, window.month2.end).await?;
            let avg_month3 = self.average(&song_id, window.month3.start, window.month3.end).await?;
            rows.push(TrendRow::from_averages(song_id, avg_month1, avg_month2, avg_month3));
        }

        trend::sort_rows(&mut rows);
        Ok(rows)
    }
}

/// Averages for the `months` whole calendar months preceding the month of
/// `from`, oldest first.
pub async fn preceding_monthly_averages(
    store: &dyn VoteStore,
    song_id: &str,
    from: NaiveDate,
    months: u32,
) -> Result<Vec<MonthlyAverage>> {
    let mut result = Vec::with_capacity(months as usize);

    for offset in (1..=months).rev() {
        let range = MonthRange::containing(months_before(from, offset));
        let average = store.average(song_id, range.start, range.end).await?;
        result.push(MonthlyAverage {
            month: range.label(),
            average,
        });
    }

    Ok(result)
}
