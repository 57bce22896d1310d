//! SQLite storage backend
//!
//! Persistent storage implementation using SQLite through sqlx.
//!
//! # Environment Variables
//!
//! - `NETWORK_MAP_DATABASE_URL`: SQLite connection string
//!   e.g., `sqlite://netmap.db` or `sqlite::memory:`

use async_trait::async_trait;
use netmap_core::SecureHash;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use super::{NetworkStore, ParticipantRecord, StorageError, UpsertOutcome};

/// SQLite network store implementation
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a connection string
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url = %database_url, "Connected to SQLite database");

        let store = Self { pool };

        // Run migrations
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                hash TEXT PRIMARY KEY,
                identity TEXT NOT NULL UNIQUE,
                raw BLOB NOT NULL,
                stored_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS network_parameters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload BLOB NOT NULL,
                saved_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool for direct access if needed
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

#[async_trait]
impl NetworkStore for SqliteStore {
    // =========================================================================
    // Participants
    // =========================================================================

    async fn upsert_participant(
        &self,
        record: ParticipantRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        let hash = record.content_hash.to_string();
        let identity = record.primary_identity.to_string();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let existing: Option<String> =
            sqlx::query("SELECT hash FROM participants WHERE identity = ?1")
                .bind(&identity)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?
                .map(|row| row.get("hash"));

        if existing.as_deref() == Some(hash.as_str()) {
            tx.rollback().await.map_err(db_error)?;
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query("DELETE FROM participants WHERE identity = ?1")
            .bind(&identity)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO participants (hash, identity, raw, stored_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&hash)
        .bind(&identity)
        .bind(&record.raw_bytes)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(hash = %hash, error = %e, "Failed to store participant");
            db_error(e)
        })?;

        tx.commit().await.map_err(db_error)?;
        info!(hash = %hash, identity = %identity, "Stored participant in database");

        match existing {
            Some(old) => {
                let old = SecureHash::parse(&old)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(UpsertOutcome::Superseded(old))
            }
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn get_participant(
        &self,
        hash: &SecureHash,
    ) -> Result<Option<Arc<ParticipantRecord>>, StorageError> {
        let row = sqlx::query("SELECT raw FROM participants WHERE hash = ?1")
            .bind(hash.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|r| ParticipantRecord::from_stored_bytes(r.get("raw")).map(Arc::new))
            .transpose()
    }

    async fn participant_hashes(&self) -> Result<Vec<SecureHash>, StorageError> {
        let rows = sqlx::query("SELECT hash FROM participants ORDER BY hash")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|r| {
                SecureHash::parse(r.get("hash"))
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn participants(&self) -> Result<Vec<Arc<ParticipantRecord>>, StorageError> {
        let rows = sqlx::query("SELECT raw FROM participants ORDER BY hash")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter()
            .map(|r| ParticipantRecord::from_stored_bytes(r.get("raw")).map(Arc::new))
            .collect()
    }

    async fn purge_participants(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM participants")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        let count = result.rows_affected();
        info!(count = count, "Purged participants from database");
        Ok(count)
    }

    // =========================================================================
    // Network Parameters
    // =========================================================================

    async fn save_parameters(&self, payload: &[u8]) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO network_parameters (payload, saved_at) VALUES (?1, ?2)")
            .bind(payload)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn latest_parameters(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query("SELECT payload FROM network_parameters ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|r| r.get("payload")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::tests::record;

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_supersede_and_lookup() {
        let store = store().await;
        let v1 = record("O=Alice,L=London,C=GB", 1);
        let v2 = record("O=Alice,L=London,C=GB", 2);
        let (h1, h2) = (v1.content_hash, v2.content_hash);

        assert_eq!(store.upsert_participant(v1.clone()).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_participant(v1).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(
            store.upsert_participant(v2).await.unwrap(),
            UpsertOutcome::Superseded(h1)
        );

        assert!(store.get_participant(&h1).await.unwrap().is_none());
        let found = store.get_participant(&h2).await.unwrap().unwrap();
        assert_eq!(found.descriptor.serial, 2);
        assert_eq!(store.participant_hashes().await.unwrap(), vec![h2]);
    }

    #[tokio::test]
    async fn test_hashes_match_memory_ordering() {
        let store = store().await;
        let mut expected = Vec::new();
        for name in ["O=Alice,L=London,C=GB", "O=Bob,L=Paris,C=FR", "O=Carol,L=Berlin,C=DE"] {
            let r = record(name, 1);
            expected.push(r.content_hash);
            store.upsert_participant(r).await.unwrap();
        }
        expected.sort();

        assert_eq!(store.participant_hashes().await.unwrap(), expected);
        let records = store.participants().await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.content_hash).collect::<Vec<_>>(),
            expected
        );

        assert_eq!(store.purge_participants().await.unwrap(), 3);
        assert!(store.participant_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_parameters_wins() {
        let store = store().await;
        assert!(store.latest_parameters().await.unwrap().is_none());

        store.save_parameters(b"first").await.unwrap();
        store.save_parameters(b"second").await.unwrap();
        assert_eq!(
            store.latest_parameters().await.unwrap().as_deref(),
            Some(&b"second"[..])
        );
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("netmap.db").display());

        let alice = record("O=Alice,L=London,C=GB", 1);
        let hash = alice.content_hash;
        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.upsert_participant(alice).await.unwrap();
            store.save_parameters(b"params").await.unwrap();
        }

        let reopened = SqliteStore::new(&url).await.unwrap();
        assert!(reopened.get_participant(&hash).await.unwrap().is_some());
        assert_eq!(
            reopened.latest_parameters().await.unwrap().as_deref(),
            Some(&b"params"[..])
        );
    }
}
