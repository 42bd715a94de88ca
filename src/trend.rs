use std::cmp::Ordering;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{ExportRecord, MonthWindow, TrendRow};
use crate::store::VoteStore;

pub const TRENDING_LIMIT: usize = 100;
pub const LOSING_THRESHOLD: f64 = -0.4;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Classification {
    pub trending: Vec<TrendRow>,
    pub losing: Vec<TrendRow>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrendReport {
    pub trending: Vec<ExportRecord>,
    pub losing: Vec<ExportRecord>,
}

/// Increase desc, month1 average desc, song id asc. Absent values sort last.
pub fn compare_rows(a: &TrendRow, b: &TrendRow) -> Ordering {
    desc_absent_last(a.increase, b.increase)
        .then_with(|| desc_absent_last(a.avg_month1, b.avg_month1))
        .then_with(|| a.song_id.cmp(&b.song_id))
}

pub fn sort_rows(rows: &mut [TrendRow]) {
    rows.sort_by(compare_rows);
}

fn desc_absent_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Splits rows into the capped trending bucket and the uncapped losing
/// bucket. Rows without an increase land in neither.
pub fn classify(mut rows: Vec<TrendRow>) -> Classification {
    sort_rows(&mut rows);

    let mut classification = Classification::default();
    for row in rows {
        match row.increase {
            Some(increase) if increase > 0.0 => {
                if classification.trending.len() < TRENDING_LIMIT {
                    classification.trending.push(row);
                }
            }
            Some(increase) if increase < LOSING_THRESHOLD => classification.losing.push(row),
            _ => {}
        }
    }

    classification
}

pub async fn build_trend_report(store: &dyn VoteStore, date: NaiveDate) -> Result<TrendReport> {
    let window = MonthWindow::ending_at(date);
    let rows = store.three_month_buckets(&window).await?;
    let total = rows.len();
    let classification = classify(rows);

    info!(
        %date,
        songs = total,
        trending = classification.trending.len(),
        losing = classification.losing.len(),
        "trends classified"
    );

    Ok(TrendReport {
        trending: to_export_records(store, classification.trending).await?,
        losing: to_export_records(store, classification.losing).await?,
    })
}

async fn to_export_records(store: &dyn VoteStore, rows: Vec<TrendRow>) -> Result<Vec<ExportRecord>> {
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let song_name = match store.first_record_for_song(&row.song_id).await? {
            Some(vote) => vote.song_name,
            None => {
                warn!(song_id = %row.song_id, "no vote found to resolve song name");
                row.song_id.clone()
            }
        };

        records.push(ExportRecord {
            song_name,
            song_id: row.song_id,
            rating_this_month: row.avg_month1,
            rating_previous_month: row.avg_month2,
            rating_two_months_back: row.avg_month3,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoteRecord;
    use crate::store::memory::InMemoryVoteStore;

    fn row(song_id: &str, avg1: Option<f64>, avg2: Option<f64>) -> TrendRow {
        TrendRow::from_averages(song_id, avg1, avg2, None)
    }

    fn ids(rows: &[TrendRow]) -> Vec<&str> {
        rows.iter().map(|row| row.song_id.as_str()).collect()
    }

    #[test]
    fn classifies_rising_falling_and_incomplete_songs() {
        let rows = vec![
            row("A", Some(4.5), Some(4.0)),
            row("B", Some(2.0), Some(3.0)),
            row("C", Some(3.0), None),
        ];

        let classification = classify(rows);
        assert_eq!(ids(&classification.trending), vec!["A"]);
        assert_eq!(ids(&classification.losing), vec!["B"]);
    }

    #[test]
    fn small_drops_and_flat_songs_are_in_neither_bucket() {
        let rows = vec![
            row("flat", Some(3.0), Some(3.0)),
            row("dip", Some(3.0), Some(3.25)),
            row("drop", Some(3.0), Some(3.5)),
        ];

        let classification = classify(rows);
        assert!(classification.trending.is_empty());
        assert_eq!(ids(&classification.losing), vec!["drop"]);
    }

    #[test]
    fn ties_break_by_month1_then_song_id() {
        let rows = vec![
            row("c", Some(3.0), Some(2.0)),
            row("b", Some(4.0), Some(3.0)),
            row("a", Some(3.0), Some(2.0)),
            row("d", Some(5.0), Some(3.0)),
        ];

        let classification = classify(rows);
        assert_eq!(ids(&classification.trending), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn trending_is_capped_at_one_hundred() {
        let rows: Vec<TrendRow> = (0..150)
            .map(|i| row(&format!("song-{i:03}"), Some(1.0 + f64::from(i) / 100.0), Some(1.0)))
            .collect();

        let classification = classify(rows);
        assert_eq!(classification.trending.len(), TRENDING_LIMIT);
        assert_eq!(classification.trending[0].song_id, "song-149");
        assert_eq!(classification.trending[99].song_id, "song-050");
        assert!(classification.losing.is_empty());
    }

    #[test]
    fn losing_is_not_truncated() {
        let rows: Vec<TrendRow> = (0..120)
            .map(|i| row(&format!("song-{i:03}"), Some(1.0), Some(2.0 + f64::from(i) / 100.0)))
            .collect();

        let classification = classify(rows);
        assert_eq!(classification.losing.len(), 120);
        assert_eq!(classification.losing[0].song_id, "song-000");
        assert_eq!(classification.losing[119].song_id, "song-119");
    }

    fn vote(song_id: &str, name: &str, vote_date: NaiveDate, rating: i32) -> VoteRecord {
        VoteRecord {
            vote_date,
            song_name: name.to_string(),
            song_id: song_id.to_string(),
            artist_name: "Artist".to_string(),
            artist_id: "artist-1".to_string(),
            user_id: "user-1".to_string(),
            rating,
            genre: "pop".to_string(),
        }
    }

    #[tokio::test]
    async fn report_resolves_names_and_carries_three_months() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let store = InMemoryVoteStore::default();
        store
            .save_all(&[
                vote("A", "Anthem", d(4, 1), 5),
                vote("A", "Anthem", d(4, 2), 4),
                vote("A", "Anthem", d(3, 3), 4),
                vote("A", "Anthem", d(2, 3), 3),
                vote("B", "Ballad", d(4, 10), 2),
                vote("B", "Ballad", d(3, 10), 3),
                vote("C", "Chorus", d(4, 10), 3),
            ])
            .await
            .unwrap();

        let report = build_trend_report(&store, d(4, 30)).await.unwrap();

        assert_eq!(
            report.trending,
            vec![ExportRecord {
                song_name: "Anthem".to_string(),
                song_id: "A".to_string(),
                rating_this_month: Some(4.5),
                rating_previous_month: Some(4.0),
                rating_two_months_back: Some(3.0),
            }]
        );
        assert_eq!(report.losing.len(), 1);
        assert_eq!(report.losing[0].song_name, "Ballad");
        assert_eq!(report.losing[0].rating_two_months_back, None);
    }

    #[tokio::test]
    async fn a_drop_of_exactly_the_threshold_is_not_losing() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let store = InMemoryVoteStore::default();
        store
            .save_all(&[
                vote("A", "Anthem", d(3, 1), 5),
                vote("A", "Anthem", d(3, 2), 5),
                vote("A", "Anthem", d(3, 3), 5),
                vote("A", "Anthem", d(3, 4), 4),
                vote("A", "Anthem", d(3, 5), 4),
                vote("A", "Anthem", d(2, 1), 5),
            ])
            .await
            .unwrap();

        let rows = store
            .three_month_buckets(&MonthWindow::ending_at(d(3, 31)))
            .await
            .unwrap();
        assert_eq!(rows[0].increase, Some(-0.4));

        let report = build_trend_report(&store, d(3, 31)).await.unwrap();
        assert!(report.trending.is_empty());
        assert!(report.losing.is_empty());
    }
}
