use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::VoteRecord;

pub const FIELD_COUNT: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedVotes {
    pub records: Vec<VoteRecord>,
    pub rejected: Vec<RejectedLine>,
}

pub fn read_votes_from_file(date: NaiveDate, path: &Path) -> Result<ParsedVotes> {
    let file = std::fs::File::open(path)?;
    let parsed = parse_votes(date, file);
    debug!(
        path = %path.display(),
        records = parsed.records.len(),
        rejected = parsed.rejected.len(),
        "vote file parsed"
    );
    Ok(parsed)
}

/// Parses a header-prefixed vote file. Every record gets `date` as its vote
/// date; malformed lines are skipped and reported in `rejected`.
pub fn parse_votes<R: Read>(date: NaiveDate, reader: R) -> ParsedVotes {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut parsed = ParsedVotes::default();

    for (index, result) in rdr.records().enumerate() {
        let line = result
            .as_ref()
            .ok()
            .and_then(|record| record.position())
            .map(|position| position.line())
            .unwrap_or(index as u64 + 2);

        match result.map_err(|err| err.to_string()).and_then(|record| parse_record(date, &record)) {
            Ok(vote) => parsed.records.push(vote),
            Err(reason) => {
                warn!(line, %reason, "skipping malformed vote line");
                parsed.rejected.push(RejectedLine { line, reason });
            }
        }
    }

    parsed
}

fn parse_record(date: NaiveDate, record: &StringRecord) -> std::result::Result<VoteRecord, String> {
    if record.len() != FIELD_COUNT {
        return Err(format!("expected {FIELD_COUNT} fields, found {}", record.len()));
    }

    let rating = record[5]
        .trim()
        .parse::<i32>()
        .map_err(|err| format!("invalid rating {:?}: {err}", &record[5]))?;

    Ok(VoteRecord {
        vote_date: date,
        song_name: record[0].to_string(),
        song_id: record[1].to_string(),
        artist_name: record[2].to_string(),
        artist_id: record[3].to_string(),
        user_id: record[4].to_string(),
        rating,
        genre: record[6].to_string(),
    })
}
