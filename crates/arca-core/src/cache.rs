use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;

/// Prefix reserved for this tool's own artifacts inside the source root.
/// The walker must never back these up.
pub const RESERVED_PREFIX: &str = ".__ossIndex_special_.";

/// File name of the persistent hash cache, kept under the source root.
pub const CACHE_FILE_NAME: &str = ".__ossIndex_special_.cache.dat";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS index_cache(
    path TEXT NOT NULL,
    mod_time BIGINT NOT NULL,
    size BIGINT NOT NULL,
    sha512 TEXT NOT NULL,
    last_seen_time BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS index_key_value
ON index_cache (path, mod_time, size);
";

/// Persistent `(path, mod_time, size) → chunk key` store.
///
/// The cache assumes that the key triple uniquely identifies content: a
/// tool that rewrites a file without changing its mtime or size will make
/// lookups return a stale key. Callers wanting cryptographic certainty must
/// bypass the cache and rehash.
///
/// Single-writer: the handle is owned by the walker thread and all reads
/// and writes happen inside one explicit transaction that the walker
/// commits and reopens on a time cadence. Per-row autocommit would dominate
/// the walk cost.
pub struct HashCache {
    conn: Connection,
    in_txn: bool,
}

impl HashCache {
    /// Open (or create) the cache database under the source root.
    pub fn open_under_root(root: &Path) -> Result<Self> {
        Self::open(&root.join(CACHE_FILE_NAME))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "opened hash cache");
        Ok(Self {
            conn,
            in_txn: false,
        })
    }

    /// Start the batching transaction.
    pub fn begin(&mut self) -> Result<()> {
        if !self.in_txn {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_txn = true;
        }
        Ok(())
    }

    /// Commit the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            self.conn.execute_batch("COMMIT")?;
            self.in_txn = false;
        }
        Ok(())
    }

    /// Commit and immediately reopen the transaction (the walker's
    /// periodic flush point).
    pub fn flush(&mut self) -> Result<()> {
        self.commit()?;
        self.begin()
    }

    /// Look up a cached chunk key. On a hit, `last_seen_time` is advanced
    /// to now.
    pub fn lookup(&self, path: &str, mod_time: i64, size: u64) -> Result<Option<String>> {
        let key: Option<String> = self
            .conn
            .query_row(
                "SELECT sha512 FROM index_cache WHERE path = ?1 AND mod_time = ?2 AND size = ?3",
                params![path, mod_time, size as i64],
                |row| row.get(0),
            )
            .optional()?;

        if key.is_some() {
            self.conn.execute(
                "UPDATE index_cache SET last_seen_time = ?1
                 WHERE path = ?2 AND mod_time = ?3 AND size = ?4",
                params![now_nanos(), path, mod_time, size as i64],
            )?;
        }

        Ok(key)
    }

    /// Record a freshly computed chunk key. The unique index makes this
    /// idempotent: a conflicting row is updated in place.
    pub fn insert(&self, path: &str, mod_time: i64, size: u64, chunk_key: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_cache (path, mod_time, size, sha512, last_seen_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path, mod_time, size) DO UPDATE SET
                 sha512 = excluded.sha512,
                 last_seen_time = excluded.last_seen_time",
            params![path, mod_time, size as i64, chunk_key, now_nanos()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn row_count(&self) -> usize {
        self.conn
            .query_row("SELECT COUNT(*) FROM index_cache", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap() as usize
    }

    #[cfg(test)]
    fn last_seen(&self, path: &str, mod_time: i64, size: u64) -> i64 {
        self.conn
            .query_row(
                "SELECT last_seen_time FROM index_cache
                 WHERE path = ?1 AND mod_time = ?2 AND size = ?3",
                params![path, mod_time, size as i64],
                |row| row.get(0),
            )
            .unwrap()
    }
}

impl Drop for HashCache {
    fn drop(&mut self) {
        // Unflushed inserts from the last few seconds are re-derivable by
        // rehashing on the next run.
        let _ = self.commit();
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
