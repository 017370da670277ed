use crate::model::StorageError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// A cached artifact as stored: opaque payload plus the fingerprint it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub fingerprint: String,
    pub payload: Vec<u8>,
    pub built_at: DateTime<Utc>,
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens the cache database, creating the artifacts table if needed.
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artifacts (
                name TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                payload BLOB NOT NULL,
                built_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn load(&self, name: &str) -> Result<Option<StoredArtifact>, StorageError> {
        let artifact = self
            .conn
            .query_row(
                "SELECT fingerprint, payload, built_at FROM artifacts WHERE name = ?1",
                params![name],
                |row| {
                    Ok(StoredArtifact {
                        fingerprint: row.get(0)?,
                        payload: row.get(1)?,
                        built_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(artifact)
    }

    /// Inserts or replaces the artifact stored under `name`.
    pub fn save(&self, name: &str, fingerprint: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO artifacts (name, fingerprint, payload, built_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, fingerprint, payload, Utc::now(), payload.len() as i64],
        )?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .execute("DELETE FROM artifacts WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    pub fn clear(&self) -> Result<usize, StorageError> {
        Ok(self.conn.execute("DELETE FROM artifacts", [])?)
    }

    /// Name and payload size of every stored artifact.
    pub fn list(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, size_bytes FROM artifacts ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}
