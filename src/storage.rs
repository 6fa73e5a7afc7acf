use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

async fn with_timeout<T>(fut: impl std::future::Future<Output = sqlx::Result<T>>) -> Result<T> {
    tokio::time::timeout(QUERY_TIMEOUT, fut)
        .await
        .context("database query timed out")?
        .context("database query failed")
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub username: String,
    pub public_key: String,
}

/// The relay's relational store: the user registry and description
/// metadata. SQLite in WAL mode for concurrent readers alongside the
/// writer pool.
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let db_path = data_dir.join("meshrelay.db");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", db_path.display()))?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                public_key TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("creating users table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS descriptions (
                user_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (user_id, position)
            )",
        )
        .execute(&self.pool)
        .await
        .context("creating descriptions table")?;

        Ok(())
    }

    /// Insert a new user. Fails with a unique-constraint violation if
    /// `user_id` already exists; the caller maps that to `Conflict`.
    pub async fn create_user(&self, user_id: &str, username: &str, public_key_b64: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO users (user_id, username, public_key) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(username)
            .bind(public_key_b64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRow>> {
        let row = with_timeout(
            sqlx::query_as::<_, UserRow>("SELECT user_id, username, public_key FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row)
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.get_user(user_id).await?.is_some())
    }

    /// All registered user_ids, for computing presence against the live
    /// connection table.
    pub async fn list_user_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            with_timeout(sqlx::query_as("SELECT user_id FROM users").fetch_all(&self.pool)).await?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    pub async fn set_descriptions(&self, user_id: &str, descriptions: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        sqlx::query("DELETE FROM descriptions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("clearing descriptions")?;
        for (position, body) in descriptions.iter().enumerate() {
            sqlx::query("INSERT INTO descriptions (user_id, position, body) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(position as i64)
                .bind(body)
                .execute(&mut *tx)
                .await
                .context("inserting description")?;
        }
        tx.commit().await.context("committing transaction")?;
        Ok(())
    }

    pub async fn get_descriptions(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = with_timeout(
            sqlx::query_as("SELECT body FROM descriptions WHERE user_id = ? ORDER BY position ASC")
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(|(body,)| body).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get_user_round_trips() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_user("alice", "Alice", "pubkey-b64").await.unwrap();
        let user = storage.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.public_key, "pubkey-b64");
    }

    #[tokio::test]
    async fn list_user_ids_returns_all_registered_users() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_user("alice", "Alice", "k1").await.unwrap();
        storage.create_user("bob", "Bob", "k2").await.unwrap();
        let mut ids = storage.list_user_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_user("alice", "Alice", "k1").await.unwrap();
        let err = storage.create_user("alice", "Alice2", "k2").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn descriptions_round_trip_in_order() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_user("alice", "Alice", "k1").await.unwrap();
        storage
            .set_descriptions("alice", &["first".into(), "second".into()])
            .await
            .unwrap();
        let descriptions = storage.get_descriptions("alice").await.unwrap();
        assert_eq!(descriptions, vec!["first".to_string(), "second".to_string()]);
    }
}
