use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
pub use sqlx::Error;
use teloxide::types::ChatId;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub chat_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a subscribe request. Subscribing an already subscribed chat is
/// not an error; the existing record is kept as-is.
#[derive(Debug)]
pub enum NewSubscription {
    Created(Subscription),
    AlreadyExists(Subscription),
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await?;
        let database = Self { pool };
        database.create_schema().await?;
        Ok(database)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, Error> {
        // a pool of one connection, otherwise every connection would get its
        // own empty in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let database = Self { pool };
        database.create_schema().await?;
        Ok(database)
    }

    async fn create_schema(&self) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                chat_id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS images (
                name TEXT PRIMARY KEY,
                file_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn add_subscription(
        &self,
        chat_id: ChatId,
        created_at: DateTime<Utc>,
    ) -> Result<NewSubscription, Error> {
        let mut transaction = self.pool.begin().await?;

        let existing: Option<Subscription> =
            sqlx::query_as("SELECT chat_id, created_at FROM subscriptions WHERE chat_id = ?")
                .bind(chat_id.0)
                .fetch_optional(&mut *transaction)
                .await?;

        if let Some(existing) = existing {
            transaction.rollback().await?;
            return Ok(NewSubscription::AlreadyExists(existing));
        }

        sqlx::query("INSERT INTO subscriptions (chat_id, created_at) VALUES (?, ?)")
            .bind(chat_id.0)
            .bind(created_at)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;

        Ok(NewSubscription::Created(Subscription {
            chat_id: chat_id.0,
            created_at,
        }))
    }

    pub async fn get_subscription(&self, chat_id: ChatId) -> Result<Option<Subscription>, Error> {
        sqlx::query_as("SELECT chat_id, created_at FROM subscriptions WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn remove_subscription(&self, chat_id: ChatId) -> Result<bool, Error> {
        sqlx::query("DELETE FROM subscriptions WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
    }

    pub async fn active_subscriptions(&self) -> Result<Vec<Subscription>, Error> {
        sqlx::query_as("SELECT chat_id, created_at FROM subscriptions ORDER BY chat_id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn cached_file_id(&self, name: &str) -> Result<Option<String>, Error> {
        sqlx::query_scalar("SELECT file_id FROM images WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn store_file_id(&self, name: &str, file_id: &str) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO images (name, file_id)
                VALUES ($1, $2)
                ON CONFLICT(name)
                DO UPDATE SET file_id = $2",
        )
        .bind(name)
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
