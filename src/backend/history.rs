use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use super::error::HistoryError;

/// One previously searched subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorRecord {
    pub name: String,
    pub folder_path: String,
    pub thumbnail_path: String,
}

/// SQLite record of past subjects, keyed by display name.
#[derive(Debug, Clone)]
pub struct History {
    pool: SqlitePool,
}

impl History {
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| HistoryError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let history = Self { pool };
        history.init().await?;
        Ok(history)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, HistoryError> {
        // One connection: every sqlite::memory: connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let history = Self { pool };
        history.init().await?;
        Ok(history)
    }

    async fn init(&self) -> Result<(), HistoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS actors \
             (name TEXT PRIMARY KEY, folder_path TEXT, thumbnail_path TEXT)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(&self, record: &ActorRecord) -> Result<(), HistoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO actors (name, folder_path, thumbnail_path) VALUES (?, ?, ?)",
        )
        .bind(&record.name)
        .bind(&record.folder_path)
        .bind(&record.thumbnail_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn lookup(&self, name: &str) -> Result<Option<ActorRecord>, HistoryError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT name, folder_path, thumbnail_path FROM actors WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_record))
    }

    /// All records, sorted case-insensitively by name.
    pub async fn lookup_all(&self) -> Result<Vec<ActorRecord>, HistoryError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT name, folder_path, thumbnail_path FROM actors ORDER BY lower(name)",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }
}

fn into_record((name, folder_path, thumbnail_path): (String, String, String)) -> ActorRecord {
    ActorRecord {
        name,
        folder_path,
        thumbnail_path,
    }
}

/// Case-insensitive substring match on the name.
pub fn filter_records(records: Vec<ActorRecord>, text: &str) -> Vec<ActorRecord> {
    let needle = text.to_lowercase();
    records
        .into_iter()
        .filter(|r| r.name.to_lowercase().contains(&needle))
        .collect()
}
