//! Embedded SQL-backed `(module, key) -> JSON` cache used by health checks
//! to memoize state between invocations.
//!
//! Backed by `rusqlite` (bundled SQLite, no system dependency). A single
//! connection is opened once per process and wrapped in a mutex so
//! concurrent in-process callers serialize through it rather than racing
//! on the file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create state directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
}

pub struct KvStore {
    conn: Mutex<Connection>,
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: String,
    pub cached_at: DateTime<Utc>,
    pub next_check_at: Option<DateTime<Utc>>,
}

impl KvStore {
    /// Opens (creating if absent) the store at `path`, running schema
    /// migration. Safe to call at most once per process; share the
    /// resulting handle rather than reopening.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KvError::CreateDir(parent.to_path_buf(), e))?;
        }
        let conn = Connection::open(path)?;
        migrate(&conn)?;
        debug!(path = %path.display(), "kv store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upserts `(module, key) -> value`. Last writer wins.
    pub fn put(
        &self,
        module: &str,
        key: &str,
        value: &str,
        next_check_at: Option<DateTime<Utc>>,
        cached_at: Option<DateTime<Utc>>,
    ) -> Result<(), KvError> {
        let cached_at = cached_at.unwrap_or_else(Utc::now);
        let conn = self.conn.lock().expect("kv connection mutex poisoned");
        conn.execute(
            "INSERT INTO kv (module, key, value, cached_at, next_check_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(module, key) DO UPDATE SET
                value = excluded.value,
                cached_at = excluded.cached_at,
                next_check_at = excluded.next_check_at",
            params![
                module,
                key,
                value,
                cached_at.to_rfc3339(),
                next_check_at.map(|t| t.to_rfc3339())
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, module: &str, key: &str) -> Result<Option<KvEntry>, KvError> {
        let conn = self.conn.lock().expect("kv connection mutex poisoned");
        let row = conn
            .query_row(
                "SELECT value, cached_at, next_check_at FROM kv WHERE module = ?1 AND key = ?2",
                params![module, key],
                |row| {
                    let value: String = row.get(0)?;
                    let cached_at: String = row.get(1)?;
                    let next_check_at: Option<String> = row.get(2)?;
                    Ok((value, cached_at, next_check_at))
                },
            )
            .optional()?;

        Ok(row.map(|(value, cached_at, next_check_at)| KvEntry {
            value,
            cached_at: parse_timestamp(&cached_at),
            next_check_at: next_check_at.as_deref().map(parse_timestamp),
        }))
    }

    pub fn delete(&self, module: &str, key: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().expect("kv connection mutex poisoned");
        conn.execute(
            "DELETE FROM kv WHERE module = ?1 AND key = ?2",
            params![module, key],
        )?;
        Ok(())
    }

    /// Lists all keys for a module, for `monokit db list`.
    pub fn list(&self, module: &str) -> Result<Vec<String>, KvError> {
        let conn = self.conn.lock().expect("kv connection mutex poisoned");
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE module = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![module], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Dumps every row, for `monokit db dump`.
    pub fn dump(&self) -> Result<Vec<(String, String, KvEntry)>, KvError> {
        let conn = self.conn.lock().expect("kv connection mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT module, key, value, cached_at, next_check_at FROM kv ORDER BY module, key")?;
        let rows = stmt
            .query_map([], |row| {
                let module: String = row.get(0)?;
                let key: String = row.get(1)?;
                let value: String = row.get(2)?;
                let cached_at: String = row.get(3)?;
                let next_check_at: Option<String> = row.get(4)?;
                Ok((module, key, value, cached_at, next_check_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(module, key, value, cached_at, next_check_at)| {
                (
                    module,
                    key,
                    KvEntry {
                        value,
                        cached_at: parse_timestamp(&cached_at),
                        next_check_at: next_check_at.as_deref().map(parse_timestamp),
                    },
                )
            })
            .collect())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn migrate(conn: &Connection) -> Result<(), KvError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            module TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            cached_at TEXT NOT NULL,
            next_check_at TEXT,
            PRIMARY KEY (module, key)
         );",
    )?;
    Ok(())
}

/// Default storage path, chosen per OS and user-mode: the system path
/// when running as root, a per-user XDG state directory otherwise, and
/// finally a tmp path if neither is writable.
pub fn default_path() -> PathBuf {
    if is_root() {
        return PathBuf::from("/var/lib/mono/health.db");
    }
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg_state).join("mono").join("health.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local/state")
            .join("mono")
            .join("health.db");
    }
    std::env::temp_dir().join("mono").join("health.db")
}

#[cfg(unix)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(&dir.path().join("health.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = open_tmp();
        store.put("osHealth", "disk", "{\"used\":42}", None, None).unwrap();
        let entry = store.get("osHealth", "disk").unwrap().unwrap();
        assert_eq!(entry.value, "{\"used\":42}");
    }

    #[test]
    fn delete_then_get_is_none() {
        let (_dir, store) = open_tmp();
        store.put("osHealth", "disk", "v", None, None).unwrap();
        store.delete("osHealth", "disk").unwrap();
        assert!(store.get("osHealth", "disk").unwrap().is_none());
    }

    #[test]
    fn upsert_preserves_primary_key() {
        let (_dir, store) = open_tmp();
        store.put("m", "k", "v1", None, None).unwrap();
        store.put("m", "k", "v2", None, None).unwrap();
        assert_eq!(store.list("m").unwrap(), vec!["k".to_string()]);
        assert_eq!(store.get("m", "k").unwrap().unwrap().value, "v2");
    }

    #[test]
    fn get_missing_key_is_none() {
        let (_dir, store) = open_tmp();
        assert!(store.get("m", "nope").unwrap().is_none());
    }
}
