use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tracing::debug;

use crate::error::Result;
use crate::store::{FeedRecord, StateStore};

const UPSERT_SQL: &str = r#"
    INSERT INTO feed_state (title, last_item_title, last_item_link, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(title) DO UPDATE SET
        last_item_title = excluded.last_item_title,
        last_item_link = excluded.last_item_link,
        updated_at = excluded.updated_at
"#;

// One run owns the store; a single connection also keeps
// `sqlite::memory:` databases coherent.
fn pool_options() -> SqlitePoolOptions {
    SqlitePoolOptions::new().max_connections(1)
}

/// SQLite-backed state store.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = pool_options().connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Open (creating if missing) the database file at `path`. The path is
    /// never spliced into a URL, so `?` and `#` in file names are literal.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = pool_options().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_state (
                title TEXT PRIMARY KEY NOT NULL,
                last_item_title TEXT NOT NULL,
                last_item_link TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_record(&self, title: &str) -> Result<Option<FeedRecord>> {
        let record = sqlx::query_as::<_, FeedRecord>(
            "SELECT title, last_item_title, last_item_link FROM feed_state WHERE title = ?",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, record: &FeedRecord) -> Result<()> {
        sqlx::query(UPSERT_SQL)
            .bind(&record.title)
            .bind(&record.last_item_title)
            .bind(&record.last_item_link)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for Database {
    async fn load_all(&self) -> Result<HashMap<String, FeedRecord>> {
        let records = sqlx::query_as::<_, FeedRecord>(
            "SELECT title, last_item_title, last_item_link FROM feed_state ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} feed records", records.len());
        Ok(records
            .into_iter()
            .map(|record| (record.title.clone(), record))
            .collect())
    }

    async fn upsert(&self, record: &FeedRecord) -> Result<()> {
        self.upsert_all(std::slice::from_ref(record)).await
    }

    async fn upsert_all(&self, records: &[FeedRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::upsert_in(&mut tx, record).await?;
        }
        tx.commit().await?;

        debug!("Committed {} feed records", records.len());
        Ok(())
    }
}
