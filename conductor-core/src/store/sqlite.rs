//! SQLite-backed [`Store`]. One database file per process, WAL mode for
//! read concurrency under the multi-threaded worker pool.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::clock::{millis_to_system_time, system_time_to_millis};
use crate::error::{Result, RuntimeError};

use super::{LogRecord, Namespace, Store, StoredValue};

fn ns_to_key(namespace: &Namespace) -> String {
    serde_json::to_string(namespace).unwrap_or_else(|_| "[]".to_string())
}

/// Opens a connection with a busy timeout so that one spawn_blocking task's
/// write doesn't surface as a spurious `SQLITE_BUSY` error to a concurrent
/// writer racing it on the same db file -- WAL mode only buys readers
/// freedom from the writer, not writers from each other.
fn open_conn(db_path: &Path) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// SQLite-backed [`Store`]. Opens a fresh connection per operation inside
/// `spawn_blocking`, since `rusqlite::Connection` is synchronous and not
/// `Sync`.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` and ensures the
    /// schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let conn = open_conn(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS store_kv (
                ns TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER,
                version INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (ns, key)
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS store_log (
                ns TEXT NOT NULL,
                seq INTEGER NOT NULL,
                record TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (ns, seq)
            )
            "#,
            [],
        )?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ns = ns_to_key(namespace);
        let key = key.to_string();
        let value_str = serde_json::to_string(value)?;
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let now = SystemTime::now();
            let now_ms = system_time_to_millis(now);
            let expires_at_ms = ttl.map(|d| now_ms + d.as_millis() as i64);

            let existing: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT created_at, version FROM store_kv WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (created_at, version) = match existing {
                Some((created_at, version)) => (created_at, version + 1),
                None => (now_ms, 1),
            };

            conn.execute(
                "INSERT OR REPLACE INTO store_kv (ns, key, value, created_at, updated_at, expires_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![ns, key, value_str, created_at, now_ms, expires_at_ms, version],
            )?;
            Ok::<(), RuntimeError>(())
        })
        .await??;
        Ok(())
    }

    async fn get(&self, namespace: &Namespace, key: &str, now: SystemTime) -> Result<Option<StoredValue>> {
        let ns = ns_to_key(namespace);
        let key = key.to_string();
        let db_path = self.db_path.clone();
        let now_ms = system_time_to_millis(now);

        let row = tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let row: Option<(String, i64, i64, Option<i64>, i64)> = conn
                .query_row(
                    "SELECT value, created_at, updated_at, expires_at, version FROM store_kv
                     WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    },
                )
                .optional()?;
            Ok::<_, RuntimeError>(row)
        })
        .await??;

        let Some((value_str, created_at, updated_at, expires_at, version)) = row else {
            return Ok(None);
        };
        if let Some(exp) = expires_at {
            if exp <= now_ms {
                return Ok(None);
            }
        }
        Ok(Some(StoredValue {
            value: serde_json::from_str(&value_str)?,
            created_at: millis_to_system_time(created_at),
            updated_at: millis_to_system_time(updated_at),
            expires_at: expires_at.map(millis_to_system_time),
            version,
        }))
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool> {
        let ns = ns_to_key(namespace);
        let key = key.to_string();
        let db_path = self.db_path.clone();

        let existed = tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let n = conn.execute(
                "DELETE FROM store_kv WHERE ns = ?1 AND key = ?2",
                params![ns, key],
            )?;
            Ok::<usize, RuntimeError>(n)
        })
        .await??;
        Ok(existed > 0)
    }

    async fn scan(
        &self,
        namespace: &Namespace,
        prefix: Option<&str>,
        until: SystemTime,
    ) -> Result<Vec<(String, StoredValue)>> {
        let ns = ns_to_key(namespace);
        let prefix = prefix.map(str::to_string);
        let db_path = self.db_path.clone();
        let until_ms = system_time_to_millis(until);

        let rows = tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let like_pattern = prefix.as_ref().map(|p| format!("{p}%"));
            let mut stmt = conn.prepare(
                "SELECT key, value, created_at, updated_at, expires_at, version FROM store_kv
                 WHERE ns = ?1 AND created_at <= ?2 AND (?3 IS NULL OR key LIKE ?3)
                 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(params![ns, until_ms, like_pattern], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, RuntimeError>(rows)
        })
        .await??;

        let until_ms_check = until_ms;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value_str, created_at, updated_at, expires_at, version) in rows {
            if let Some(exp) = expires_at {
                if exp <= until_ms_check {
                    continue;
                }
            }
            out.push((
                key,
                StoredValue {
                    value: serde_json::from_str(&value_str)?,
                    created_at: millis_to_system_time(created_at),
                    updated_at: millis_to_system_time(updated_at),
                    expires_at: expires_at.map(millis_to_system_time),
                    version,
                },
            ));
        }
        Ok(out)
    }

    async fn cas(
        &self,
        namespace: &Namespace,
        key: &str,
        expected_version: i64,
        new_value: &serde_json::Value,
    ) -> Result<i64> {
        let ns = ns_to_key(namespace);
        let key = key.to_string();
        let value_str = serde_json::to_string(new_value)?;
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&db_path)?;
            let now_ms = system_time_to_millis(SystemTime::now());
            let tx = conn.transaction()?;

            let current: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT created_at, version FROM store_kv WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match current {
                None if expected_version == 0 => {
                    tx.execute(
                        "INSERT INTO store_kv (ns, key, value, created_at, updated_at, expires_at, version)
                         VALUES (?1, ?2, ?3, ?4, ?4, NULL, 1)",
                        params![ns, key, value_str, now_ms],
                    )?;
                    tx.commit()?;
                    Ok(1)
                }
                Some((created_at, version)) if version == expected_version => {
                    let new_version = version + 1;
                    tx.execute(
                        "UPDATE store_kv SET value = ?1, updated_at = ?2, version = ?3
                         WHERE ns = ?4 AND key = ?5",
                        params![value_str, now_ms, new_version, ns, key],
                    )?;
                    tx.commit()?;
                    let _ = created_at;
                    Ok(new_version)
                }
                _ => Err(RuntimeError::conflict(format!(
                    "cas version mismatch for {ns}/{key}"
                ))),
            }
        })
        .await?
    }

    async fn log(&self, namespace: &Namespace, record: &serde_json::Value) -> Result<i64> {
        let ns = ns_to_key(namespace);
        let record_str = serde_json::to_string(record)?;
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&db_path)?;
            let now_ms = system_time_to_millis(SystemTime::now());
            let tx = conn.transaction()?;
            let next_seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM store_log WHERE ns = ?1",
                    params![ns],
                    |row| row.get(0),
                )?;
            tx.execute(
                "INSERT INTO store_log (ns, seq, record, recorded_at) VALUES (?1, ?2, ?3, ?4)",
                params![ns, next_seq, record_str, now_ms],
            )?;
            tx.commit()?;
            Ok::<i64, RuntimeError>(next_seq)
        })
        .await?
    }

    async fn log_scan(&self, namespace: &Namespace, since_seq: i64, limit: usize) -> Result<Vec<LogRecord>> {
        let ns = ns_to_key(namespace);
        let db_path = self.db_path.clone();
        let limit = limit as i64;

        let rows = tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT seq, record, recorded_at FROM store_log
                 WHERE ns = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![ns, since_seq, limit], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, RuntimeError>(rows)
        })
        .await??;

        rows.into_iter()
            .map(|(seq, record_str, recorded_at)| {
                Ok(LogRecord {
                    seq,
                    record: serde_json::from_str(&record_str)?,
                    recorded_at: millis_to_system_time(recorded_at),
                })
            })
            .collect()
    }

    async fn log_delete_before(&self, namespace: &Namespace, before: SystemTime) -> Result<usize> {
        let ns = ns_to_key(namespace);
        let db_path = self.db_path.clone();
        let before_ms = system_time_to_millis(before);

        let removed = tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let n = conn.execute(
                "DELETE FROM store_log WHERE ns = ?1 AND recorded_at < ?2",
                params![ns, before_ms],
            )?;
            Ok::<usize, RuntimeError>(n)
        })
        .await??;
        Ok(removed)
    }
}
