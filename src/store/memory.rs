use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::VoteRecord;

use super::VoteStore;

#[derive(Debug, Default)]
pub struct InMemoryVoteStore {
    votes: RwLock<Vec<VoteRecord>>,
}

impl InMemoryVoteStore {
    pub fn snapshot(&self) -> Vec<VoteRecord> {
        self.votes.read().unwrap().clone()
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    async fn save_all(&self, records: &[VoteRecord]) -> Result<usize> {
        self.votes.write().unwrap().extend_from_slice(records);
        Ok(records.len())
    }

    async fn average(&self, song_id: &str, since: NaiveDate, until: NaiveDate) -> Result<Option<f64>> {
        let votes = self.votes.read().unwrap();
        let ratings: Vec<i32> = votes
            .iter()
            .filter(|vote| vote.song_id == song_id && since <= vote.vote_date && vote.vote_date <= until)
            .map(|vote| vote.rating)
            .collect();

        if ratings.is_empty() {
            return Ok(None);
        }
        let total: i64 = ratings.iter().map(|rating| i64::from(*rating)).sum();
        Ok(Some(total as f64 / ratings.len() as f64))
    }

    async fn distinct_song_ids(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<String>> {
        let votes = self.votes.read().unwrap();
        let ids: BTreeSet<String> = votes
            .iter()
            .filter(|vote| since <= vote.vote_date && vote.vote_date <= until)
            .map(|vote| vote.song_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn first_record_for_song(&self, song_id: &str) -> Result<Option<VoteRecord>> {
        let votes = self.votes.read().unwrap();
        Ok(votes.iter().find(|vote| vote.song_id == song_id).cloned())
    }
}
