use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteRecord {
    pub vote_date: NaiveDate,
    pub song_name: String,
    pub song_id: String,
    pub artist_name: String,
    pub artist_id: String,
    pub user_id: String,
    pub rating: i32,
    pub genre: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAverage {
    pub month: String,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    pub song_id: String,
    pub increase: Option<f64>,
    pub avg_month1: Option<f64>,
    pub avg_month2: Option<f64>,
    pub avg_month3: Option<f64>,
}

impl TrendRow {
    /// Builds a row from the three monthly averages, deriving `increase`.
    pub fn from_averages(
        song_id: impl Into<String>,
        avg_month1: Option<f64>,
        avg_month2: Option<f64>,
        avg_month3: Option<f64>,
    ) -> Self {
        let increase = match (avg_month1, avg_month2) {
            (Some(current), Some(previous)) => Some(round_increase(current - previous)),
            _ => None,
        };

        Self {
            song_id: song_id.into(),
            increase,
            avg_month1,
            avg_month2,
            avg_month3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub song_name: String,
    #[serde(rename = "song_uuid")]
    pub song_id: String,
    pub rating_this_month: Option<f64>,
    pub rating_previous_month: Option<f64>,
    #[serde(rename = "rating_2months_back")]
    pub rating_two_months_back: Option<f64>,
}

/// Inclusive date range covering (part of) one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthRange {
    /// The whole calendar month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            start: first_day_of_month(date),
            end: last_day_of_month(date),
        }
    }

    pub fn label(&self) -> String {
        month_label(self.start)
    }
}

/// Three consecutive months ending at a triggering date: `month1` is the
/// triggering month (truncated at the date), `month3` the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub month1: MonthRange,
    pub month2: MonthRange,
    pub month3: MonthRange,
}

impl MonthWindow {
    pub fn ending_at(date: NaiveDate) -> Self {
        let month1 = MonthRange {
            start: first_day_of_month(date),
            end: date,
        };
        let month2 = MonthRange::containing(months_before(month1.start, 1));
        let month3 = MonthRange::containing(months_before(month1.start, 2));

        Self {
            month1,
            month2,
            month3,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.month3.start
    }

    pub fn end(&self) -> NaiveDate {
        self.month1.end
    }
}

/// Trims float noise so a drop of exactly 0.4 equals the losing threshold.
fn round_increase(increase: f64) -> f64 {
    (increase * 1e9).round() / 1e9
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(i64::from(date.day0()))
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = first_day_of_month(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    date == last_day_of_month(date)
}

pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

pub fn month_label(date: NaiveDate) -> String {
    date.format("%Y%m").to_string()
}
