use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{MonthWindow, TrendRow, VoteRecord};
use crate::store::VoteStore;

// Postgres caps bind parameters at 65535 per statement; 9 binds per vote.
const INSERT_CHUNK: usize = 1000;

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgVoteStore {
    pool: PgPool,
}

impl PgVoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteStore for PgVoteStore {
    async fn save_all(&self, records: &[VoteRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO votes \
                 (id, vote_date, song_name, song_id, artist_name, artist_id, user_id, rating, genre) ",
            );
            builder.push_values(chunk, |mut row, vote| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(vote.vote_date)
                    .push_bind(&vote.song_name)
                    .push_bind(&vote.song_id)
                    .push_bind(&vote.artist_name)
                    .push_bind(&vote.artist_id)
                    .push_bind(&vote.user_id)
                    .push_bind(vote.rating)
                    .push_bind(&vote.genre);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn average(&self, song_id: &str, since: NaiveDate, until: NaiveDate) -> Result<Option<f64>> {
        let average: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(rating)::float8 FROM votes \
             WHERE song_id = $1 AND vote_date BETWEEN $2 AND $3",
        )
        .bind(song_id)
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(average)
    }

    async fn distinct_song_ids(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT song_id FROM votes \
             WHERE vote_date BETWEEN $1 AND $2 \
             ORDER BY song_id",
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn first_record_for_song(&self, song_id: &str) -> Result<Option<VoteRecord>> {
        let row = sqlx::query(
            "SELECT vote_date, song_name, song_id, artist_name, artist_id, user_id, rating, genre \
             FROM votes WHERE song_id = $1 LIMIT 1",
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| VoteRecord {
            vote_date: row.get("vote_date"),
            song_name: row.get("song_name"),
            song_id: row.get("song_id"),
            artist_name: row.get("artist_name"),
            artist_id: row.get("artist_id"),
            user_id: row.get("user_id"),
            rating: row.get("rating"),
            genre: row.get("genre"),
        }))
    }

    async fn three_month_buckets(&self, window: &MonthWindow) -> Result<Vec<TrendRow>> {
        let rows = sqlx::query(
            r#"
            SELECT song_id,
                   (AVG(rating) FILTER (WHERE vote_date BETWEEN $1 AND $2)
                    - AVG(rating) FILTER (WHERE vote_date BETWEEN $3 AND $4))::float8 AS increase,
                   (AVG(rating) FILTER (WHERE vote_date BETWEEN $1 AND $2))::float8 AS month1,
                   (AVG(rating) FILTER (WHERE vote_date BETWEEN $3 AND $4))::float8 AS month2,
                   (AVG(rating) FILTER (WHERE vote_date BETWEEN $5 AND $6))::float8 AS month3
            FROM votes
            WHERE vote_date BETWEEN $5 AND $2
            GROUP BY song_id
            ORDER BY increase DESC NULLS LAST, month1 DESC NULLS LAST, song_id
            "#,
        )
        .bind(window.month1.start)
        .bind(window.month1.end)
        .bind(window.month2.start)
        .bind(window.month2.end)
        .bind(window.month3.start)
        .bind(window.month3.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TrendRow {
                song_id: row.get("song_id"),
                increase: row.get("increase"),
                avg_month1: row.get("month1"),
                avg_month2: row.get("month2"),
                avg_month3: row.get("month3"),
            })
            .collect())
    }
}
