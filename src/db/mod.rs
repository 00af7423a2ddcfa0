mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{DailyKpi, KpiCounter, NewPoll, Poll, PollOption, Vote};

/// The persistence collaborator: polls, options with counters, the vote
/// ledger and the daily counters.
///
/// Implementations must make `insert_vote` a single check-and-insert on
/// (poll, fingerprint) and `increment_option_vote` a single store-side add.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, new_poll: &NewPoll) -> Result<(), StoreError>;

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError>;

    /// Options in creation order.
    async fn get_options(&self, poll_id: &str) -> Result<Vec<PollOption>, StoreError>;

    /// `Err(StoreError::Conflict)` when (poll, fingerprint) already voted.
    async fn insert_vote(&self, vote: &Vote) -> Result<(), StoreError>;

    async fn increment_option_vote(&self, option_id: &str) -> Result<(), StoreError>;

    /// Ledger insert followed by the tally increment. The default runs them as
    /// two operations, so a failure in between leaves the tally one short.
    async fn record_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        self.insert_vote(vote).await?;
        self.increment_option_vote(&vote.option_id).await
    }

    /// True when `record_vote` is a single transaction.
    fn records_atomically(&self) -> bool {
        false
    }

    /// Number of ledger rows pointing at an option.
    async fn count_votes(&self, option_id: &str) -> Result<i64, StoreError>;

    async fn bump_daily(&self, day: NaiveDate, counter: KpiCounter) -> Result<(), StoreError>;

    async fn get_daily(&self, day: NaiveDate) -> Result<DailyKpi, StoreError>;
}

/// `memory` selects the in-process store, anything else is a SQLite URL.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn PollStore>, StoreError> {
    if database_url == "memory" {
        info!("Using in-memory poll store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(Database::connect(database_url).await?))
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let pool = if db_url.contains(":memory:") {
            // every connection would get its own empty database otherwise
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect(db_url)
                .await?
        } else {
            // Create database if it doesn't exist
            if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
                Sqlite::create_database(db_url).await?;
            }
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await?
        };

        // Initialize the database schema
        Self::init_schema(&pool).await?;
        info!("Connected to poll database at {}", db_url);

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        // Create polls table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Create poll options table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0),
                UNIQUE (poll_id, text),
                UNIQUE (id, poll_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // (poll_id, fingerprint) is the only integrity guarantee of the ledger
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                option_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (poll_id, fingerprint),
                FOREIGN KEY (option_id, poll_id) REFERENCES poll_options(id, poll_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Create daily counters table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kpi_daily (
                day TEXT PRIMARY KEY,
                polls_created INTEGER NOT NULL DEFAULT 0,
                votes_cast INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

const INSERT_VOTE: &str = r#"
    INSERT INTO votes (id, poll_id, option_id, fingerprint, created_at)
    VALUES (?, ?, ?, ?, ?)
"#;

// The store adds one itself; the current value is never read back first
const INCREMENT_OPTION: &str = "UPDATE poll_options SET votes = votes + 1 WHERE id = ?";

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse created_at: {}", e)))
}

fn option_from_row(row: &SqliteRow) -> Result<PollOption, StoreError> {
    Ok(PollOption {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        text: row.try_get("text")?,
        position: row.try_get("position")?,
        votes: row.try_get("votes")?,
    })
}

#[async_trait]
impl PollStore for Database {
    // Poll and its options go in together or not at all
    async fn create_poll(&self, new_poll: &NewPoll) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Insert poll
        sqlx::query("INSERT INTO polls (id, question, created_at) VALUES (?, ?, ?)")
            .bind(&new_poll.poll.id)
            .bind(&new_poll.poll.question)
            .bind(new_poll.poll.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        // Insert options
        for option in &new_poll.options {
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, text, position, votes)
                VALUES (?, ?, ?, ?, 0)
                "#,
            )
            .bind(&option.id)
            .bind(&new_poll.poll.id)
            .bind(&option.text)
            .bind(option.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        // Get the poll
        let row = sqlx::query("SELECT id, question, created_at FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("poll"))?;

        // Parse the timestamp from string
        let created_at: String = row.try_get("created_at")?;
        Ok(Poll {
            id: row.try_get("id")?,
            question: row.try_get("question")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    async fn get_options(&self, poll_id: &str) -> Result<Vec<PollOption>, StoreError> {
        sqlx::query(
            r#"
            SELECT id, poll_id, text, position, votes
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(option_from_row)
        .collect()
    }

    // No existence pre-check: the unique and foreign keys decide in one statement
    async fn insert_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        sqlx::query(INSERT_VOTE)
            .bind(&vote.id)
            .bind(&vote.poll_id)
            .bind(&vote.option_id)
            .bind(vote.fingerprint.as_str())
            .bind(vote.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_option_vote(&self, option_id: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(INCREMENT_OPTION)
            .bind(option_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound("option"));
        }
        Ok(())
    }

    async fn record_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Insert the vote
        sqlx::query(INSERT_VOTE)
            .bind(&vote.id)
            .bind(&vote.poll_id)
            .bind(&vote.option_id)
            .bind(vote.fingerprint.as_str())
            .bind(vote.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        // Bump the option counter in the same transaction
        let updated = sqlx::query(INCREMENT_OPTION)
            .bind(&vote.option_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            // dropping tx rolls back the ledger row
            return Err(StoreError::NotFound("option"));
        }

        tx.commit().await?;
        Ok(())
    }

    fn records_atomically(&self) -> bool {
        true
    }

    async fn count_votes(&self, option_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes WHERE option_id = ?")
            .bind(option_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn bump_daily(&self, day: NaiveDate, counter: KpiCounter) -> Result<(), StoreError> {
        let sql = match counter {
            KpiCounter::PollsCreated => {
                r#"
                INSERT INTO kpi_daily (day, polls_created, votes_cast) VALUES (?, 1, 0)
                ON CONFLICT(day) DO UPDATE SET polls_created = polls_created + 1
                "#
            }
            KpiCounter::VotesCast => {
                r#"
                INSERT INTO kpi_daily (day, polls_created, votes_cast) VALUES (?, 0, 1)
                ON CONFLICT(day) DO UPDATE SET votes_cast = votes_cast + 1
                "#
            }
        };

        // Upsert today's row
        sqlx::query(sql)
            .bind(day.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_daily(&self, day: NaiveDate) -> Result<DailyKpi, StoreError> {
        let row = sqlx::query("SELECT polls_created, votes_cast FROM kpi_daily WHERE day = ?")
            .bind(day.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(DailyKpi {
                day,
                polls_created: row.try_get("polls_created")?,
                votes_cast: row.try_get("votes_cast")?,
            }),
            None => Ok(DailyKpi::empty(day)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fingerprint;

    async fn test_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn pizza_poll() -> NewPoll {
        NewPoll::new(
            "Pizza or Sushi?",
            &["Pizza".to_string(), "Sushi".to_string()],
        )
        .unwrap()
    }

    fn fp(raw: &str) -> Fingerprint {
        Fingerprint::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn stores_and_reads_back_poll() {
        let db = test_db().await;
        let new_poll = pizza_poll();
        db.create_poll(&new_poll).await.unwrap();

        let poll = db.get_poll(&new_poll.poll.id).await.unwrap();
        assert_eq!(poll.question, "Pizza or Sushi?");

        let options = db.get_options(&new_poll.poll.id).await.unwrap();
        let texts: Vec<&str> = options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, ["Pizza", "Sushi"]);
        assert!(options.iter().all(|o| o.votes == 0));
    }

    #[tokio::test]
    async fn unknown_poll_is_not_found() {
        let db = test_db().await;
        assert!(matches!(
            db.get_poll("nope").await,
            Err(StoreError::NotFound("poll"))
        ));
    }

    #[tokio::test]
    async fn second_vote_with_same_fingerprint_is_a_typed_conflict() {
        let db = test_db().await;
        let new_poll = pizza_poll();
        db.create_poll(&new_poll).await.unwrap();
        let poll_id = &new_poll.poll.id;

        let first = Vote::new(poll_id, &new_poll.options[0].id, fp("fingerprint-a"));
        db.insert_vote(&first).await.unwrap();

        // a different option does not help
        let second = Vote::new(poll_id, &new_poll.options[1].id, fp("fingerprint-a"));
        assert!(matches!(db.insert_vote(&second).await, Err(StoreError::Conflict)));
        assert_eq!(db.count_votes(&new_poll.options[1].id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn option_from_another_poll_is_rejected() {
        let db = test_db().await;
        let lunch = pizza_poll();
        let dinner = pizza_poll();
        db.create_poll(&lunch).await.unwrap();
        db.create_poll(&dinner).await.unwrap();

        let vote = Vote::new(&lunch.poll.id, &dinner.options[0].id, fp("fingerprint-a"));
        assert!(matches!(
            db.insert_vote(&vote).await,
            Err(StoreError::NotFound("option"))
        ));
    }

    #[tokio::test]
    async fn increment_adds_one_in_the_store() {
        let db = test_db().await;
        let new_poll = pizza_poll();
        db.create_poll(&new_poll).await.unwrap();
        let pizza = &new_poll.options[0].id;

        db.increment_option_vote(pizza).await.unwrap();
        db.increment_option_vote(pizza).await.unwrap();

        let options = db.get_options(&new_poll.poll.id).await.unwrap();
        assert_eq!(options[0].votes, 2);
        assert_eq!(options[1].votes, 0);
        assert!(matches!(
            db.increment_option_vote("missing").await,
            Err(StoreError::NotFound("option"))
        ));
    }

    #[tokio::test]
    async fn record_vote_is_all_or_nothing() {
        let db = test_db().await;
        let new_poll = pizza_poll();
        db.create_poll(&new_poll).await.unwrap();
        let poll_id = &new_poll.poll.id;
        let sushi = &new_poll.options[1].id;

        assert!(db.records_atomically());
        db.record_vote(&Vote::new(poll_id, sushi, fp("fingerprint-b"))).await.unwrap();
        assert!(matches!(
            db.record_vote(&Vote::new(poll_id, sushi, fp("fingerprint-b"))).await,
            Err(StoreError::Conflict)
        ));

        let options = db.get_options(poll_id).await.unwrap();
        assert_eq!(options[1].votes, 1);
        assert_eq!(db.count_votes(sushi).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn daily_counters_start_at_zero_and_accumulate() {
        let db = test_db().await;
        let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();

        assert_eq!(db.get_daily(day).await.unwrap(), DailyKpi::empty(day));

        db.bump_daily(day, KpiCounter::PollsCreated).await.unwrap();
        db.bump_daily(day, KpiCounter::VotesCast).await.unwrap();
        db.bump_daily(day, KpiCounter::VotesCast).await.unwrap();

        let kpi = db.get_daily(day).await.unwrap();
        assert_eq!(kpi.polls_created, 1);
        assert_eq!(kpi.votes_cast, 2);
    }
}
