//! SQLite-backed key/value storage
//!
//! The client keeps each collection as one JSON document under a fixed key.
//! The receiver keeps delivered records in an `inbox` table keyed by
//! collection and record id.

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// How long a writer waits for another connection to release the file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database wrapper
///
/// Every read-modify-write of a key happens under the connection lock and in
/// an immediate transaction, so mutations are serialized within a process and
/// across processes sharing the file. Competing writers wait out the busy
/// timeout instead of failing.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::with_connection(Connection::open(path)?)
    }

    /// Open a throwaway database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            -- Client side: one JSON document per key
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Receiver side: records delivered by clients
            CREATE TABLE IF NOT EXISTS inbox (
                collection TEXT NOT NULL,
                id INTEGER NOT NULL,
                body TEXT NOT NULL,
                received_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        read_value(&conn, key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        write_value(&conn, key, value)
    }

    /// Delete a key; absent keys are not an error
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Atomically read, transform and rewrite one key
    ///
    /// `apply` receives the current value and returns the replacement (or
    /// `None` to leave the key untouched) plus a result for the caller.
    pub fn update<T, F>(&self, key: &str, apply: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(Option<String>, T)>,
    {
        let mut conn = self.lock()?;
        let tx = begin_write(&mut conn)?;

        let current = read_value(&tx, key)?;
        let (next, output) = apply(current)?;
        if let Some(value) = next {
            write_value(&tx, key, &value)?;
        }

        tx.commit()?;
        Ok(output)
    }

    /// Like `update`, for two keys that must change together
    pub fn update_pair<T, F>(&self, first: &str, second: &str, apply: F) -> Result<T>
    where
        F: FnOnce(Option<String>, Option<String>) -> Result<(Option<String>, Option<String>, T)>,
    {
        let mut conn = self.lock()?;
        let tx = begin_write(&mut conn)?;

        let current_first = read_value(&tx, first)?;
        let current_second = read_value(&tx, second)?;
        let (next_first, next_second, output) = apply(current_first, current_second)?;
        if let Some(value) = next_first {
            write_value(&tx, first, &value)?;
        }
        if let Some(value) = next_second {
            write_value(&tx, second, &value)?;
        }

        tx.commit()?;
        Ok(output)
    }

    /// Store a delivered record, replacing an earlier delivery with the same id
    pub fn upsert_received(
        &self,
        collection: &str,
        id: i64,
        body: &str,
        received_at: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT INTO inbox (collection, id, body, received_at) VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body,
               received_at = excluded.received_at"#,
            params![collection, id, body, received_at],
        )?;
        Ok(())
    }

    /// Delivered records of one collection, oldest first
    pub fn list_received(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT body FROM inbox WHERE collection = ?1 ORDER BY rowid")?;
        let bodies = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(Into::into))
            .collect()
    }
}

/// Take the write lock up front; a deferred transaction that upgrades later
/// fails with SQLITE_BUSY without waiting
fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(Into::into)
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}
