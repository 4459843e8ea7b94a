//! SQLite cache backend: schema, pragmas, and migrations.

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::Path;

use crate::storage::IndexCache;

const SCHEMA_VERSION: i64 = 1;

const CONTENT_HASH_KEY: &str = "content_hash";

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Index cache persisted in a local SQLite database.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening cache db at {}", path.display()))?;

        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory cache, used by tests and by callers that want the cache
    /// contract without durability.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("opening in-memory cache")?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl IndexCache for SqliteCache {
    fn load_hash(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?",
            params![CONTENT_HASH_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("reading content hash")
    }

    fn store_hash(&self, hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CONTENT_HASH_KEY, hash],
        )
        .context("storing content hash")?;
        Ok(())
    }

    fn load_chunks(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM chunks ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.context("reading chunk row")?);
        }
        Ok(chunks)
    }

    fn store_chunks(&self, chunks: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks", [])?;
        for (key, value) in chunks {
            tx.execute(
                "INSERT INTO chunks(key, value) VALUES(?, ?)",
                params![key, value],
            )
            .with_context(|| format!("storing chunk {key}"))?;
        }
        tx.commit().context("committing chunk batch")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM chunks", [])?;
        conn.execute("DELETE FROM meta WHERE key = ?", params![CONTENT_HASH_KEY])?;
        Ok(())
    }
}

fn apply_pragmas(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        "#,
    )?;
    Ok(())
}

fn init_meta(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?;

    if existing.is_none() {
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    match current {
        0 => {
            conn.execute_batch(MIGRATION_V1)?;
            conn.execute(
                "UPDATE meta SET value = ? WHERE key = 'schema_version'",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        v if v == SCHEMA_VERSION => {
            // Creation is idempotent; re-running covers a fresh connection.
            conn.execute_batch(MIGRATION_V1)?;
        }
        v => return Err(anyhow!("unsupported cache schema version {}", v)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert_eq!(cache.load_hash().unwrap(), None);

        cache.store_hash("abc123").unwrap();
        assert_eq!(cache.load_hash().unwrap(), Some("abc123".into()));

        cache.store_hash("def456").unwrap();
        assert_eq!(cache.load_hash().unwrap(), Some("def456".into()));
    }

    #[test]
    fn store_chunks_replaces_previous_set() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .store_chunks(&[
                ("terms/00".into(), "{}".into()),
                ("docs".into(), "{}".into()),
            ])
            .unwrap();
        assert_eq!(cache.load_chunks().unwrap().len(), 2);

        cache
            .store_chunks(&[("docs".into(), "{\"docs\":{}}".into())])
            .unwrap();
        let chunks = cache.load_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, "docs");
    }

    #[test]
    fn clear_drops_hash_and_chunks() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache.store_hash("abc").unwrap();
        cache.store_chunks(&[("docs".into(), "{}".into())]).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.load_hash().unwrap(), None);
        assert!(cache.load_chunks().unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = SqliteCache::open(&path).unwrap();
            cache.store_hash("persisted").unwrap();
            cache
                .store_chunks(&[("terms/01".into(), "{\"a\":{}}".into())])
                .unwrap();
        }
        let cache = SqliteCache::open(&path).unwrap();
        assert_eq!(cache.load_hash().unwrap(), Some("persisted".into()));
        assert_eq!(cache.load_chunks().unwrap().len(), 1);
    }
}
