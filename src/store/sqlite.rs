//! SQLite repository
//!
//! Entities are stored as JSON documents in per-entity tables, keyed by id.
//! Upserts use `ON CONFLICT DO UPDATE` so rowid ordering preserves
//! submission order for units.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use tracing::debug;

use crate::domain::{Account, Job, Proxy, UnitStatus, WorkUnit};
use crate::error::StoreError;

use super::{Repository, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS proxies (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    data       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS units (
    id     TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    status TEXT NOT NULL,
    data   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_units_job ON units (job_id, status);
";

/// Repository backed by a SQLite database file
///
/// `Connection` is not `Sync`, so it sits behind a mutex; every operation
/// is a single short statement or transaction.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Opened sqlite repository");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn load_all<T: serde::de::DeserializeOwned>(&self, sql: &str) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

impl Repository for SqliteRepository {
    fn load_accounts(&self) -> StoreResult<Vec<Account>> {
        self.load_all("SELECT data FROM accounts ORDER BY rowid")
    }

    fn save_account(&self, account: &Account) -> StoreResult<()> {
        let data = serde_json::to_string(account)?;
        self.conn.lock().unwrap().execute(
            "INSERT INTO accounts (id, data) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![account.id, data],
        )?;
        Ok(())
    }

    fn load_proxies(&self) -> StoreResult<Vec<Proxy>> {
        self.load_all("SELECT data FROM proxies ORDER BY rowid")
    }

    fn save_proxy(&self, proxy: &Proxy) -> StoreResult<()> {
        let data = serde_json::to_string(proxy)?;
        self.conn.lock().unwrap().execute(
            "INSERT INTO proxies (id, data) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![proxy.id, data],
        )?;
        Ok(())
    }

    fn load_job(&self, job_id: &str) -> StoreResult<Job> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row("SELECT data FROM jobs WHERE id = ?1", params![job_id], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(StoreError::not_found("job", job_id)),
        }
    }

    fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        self.load_all("SELECT data FROM jobs ORDER BY created_at DESC")
    }

    fn save_job(&self, job: &Job) -> StoreResult<()> {
        let data = serde_json::to_string(job)?;
        self.conn.lock().unwrap().execute(
            "INSERT INTO jobs (id, created_at, data) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![job.id, job.created_at, data],
        )?;
        Ok(())
    }

    fn delete_job(&self, job_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM units WHERE job_id = ?1", params![job_id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
        tx.commit()?;
        Ok(())
    }

    fn load_pending_units(&self, job_id: &str) -> StoreResult<Vec<WorkUnit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT data FROM units WHERE job_id = ?1 AND status IN (?2, ?3) ORDER BY rowid")?;
        let rows = stmt.query_map(
            params![
                job_id,
                UnitStatus::Pending.to_string(),
                UnitStatus::Processing.to_string()
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut units = Vec::new();
        for row in rows {
            units.push(serde_json::from_str(&row?)?);
        }
        Ok(units)
    }

    fn save_unit(&self, unit: &WorkUnit) -> StoreResult<()> {
        let data = serde_json::to_string(unit)?;
        self.conn.lock().unwrap().execute(
            "INSERT INTO units (id, job_id, status, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET status = excluded.status, data = excluded.data",
            params![unit.id, unit.job_id, unit.status.to_string(), data],
        )?;
        Ok(())
    }

    fn reset_daily_counters(&self) -> StoreResult<()> {
        let accounts = self.load_accounts()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for mut account in accounts {
            account.requests_today = 0;
            let data = serde_json::to_string(&account)?;
            tx.execute("UPDATE accounts SET data = ?1 WHERE id = ?2", params![data, account.id])?;
        }
        tx.commit()?;
        Ok(())
    }
}
