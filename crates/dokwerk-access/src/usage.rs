// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Usage log — append-only SQLite record of every admitted operation.
//
// Schema:
//   usage_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     user_id     INTEGER NOT NULL,
//     endpoint    TEXT    NOT NULL,   -- "convert", "compress", "ocr"
//     recorded_at INTEGER NOT NULL    -- Unix milliseconds, UTC
//   )
//
// Rows are only ever inserted. Quota windows are answered by counting rows in
// a time range, so a new month needs no reset.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::UserId;
use rusqlite::{Connection, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::window::QuotaWindow;

fn db_err(e: rusqlite::Error) -> DokwerkError {
    DokwerkError::Database(e.to_string())
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS usage_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER NOT NULL,
        endpoint    TEXT    NOT NULL,
        recorded_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS usage_by_user_time ON usage_log (user_id, recorded_at);
";

/// One admitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user: UserId,
    pub endpoint: String,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user: UserId, endpoint: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            user,
            endpoint: endpoint.into(),
            recorded_at,
        }
    }
}

/// Outcome of a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub admitted: bool,
    /// Records in the window before this call.
    pub used_before: u64,
}

/// Durable counter store behind the quota enforcer.
pub trait UsageStore: Send + Sync {
    fn append(&self, record: &UsageRecord) -> Result<()>;

    /// Records for `user` with `start <= recorded_at < end`.
    fn count_between(&self, user: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64>;

    /// Most recent `limit` records for `user`, newest first.
    fn recent_for_user(&self, user: UserId, limit: u32) -> Result<Vec<UsageRecord>>;

    /// Append `record` only if `user` has fewer than `limit` records in
    /// `window`.
    ///
    /// The default implementation counts and then appends, so two concurrent
    /// callers can both pass the check. Stores that can do better override it.
    fn append_if_below(
        &self,
        record: &UsageRecord,
        window: &QuotaWindow,
        limit: u64,
    ) -> Result<Admission> {
        let used_before = self.count_between(record.user, window.start, window.end)?;
        if used_before >= limit {
            return Ok(Admission {
                admitted: false,
                used_before,
            });
        }
        self.append(record)?;
        Ok(Admission {
            admitted: true,
            used_before,
        })
    }
}

/// SQLite-backed usage log. The connection is shared behind a mutex.
pub struct SqliteUsageStore {
    conn: Mutex<Connection>,
}

impl SqliteUsageStore {
    /// Open (or create) the usage database at `path`, in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!("usage log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory usage database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DokwerkError::Database("usage log connection poisoned".into()))
    }
}

fn count_in(conn: &Connection, user: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM usage_log
             WHERE user_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3",
            params![user.0, start.timestamp_millis(), end.timestamp_millis()],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(count.max(0) as u64)
}

fn insert(conn: &Connection, record: &UsageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO usage_log (user_id, endpoint, recorded_at) VALUES (?1, ?2, ?3)",
        params![
            record.user.0,
            record.endpoint,
            record.recorded_at.timestamp_millis()
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

impl UsageStore for SqliteUsageStore {
    #[instrument(skip(self, record), fields(user = %record.user, endpoint = %record.endpoint))]
    fn append(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.lock()?;
        insert(&conn, record)?;
        debug!("usage recorded");
        Ok(())
    }

    fn count_between(&self, user: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock()?;
        count_in(&conn, user, start, end)
    }

    fn recent_for_user(&self, user: UserId, limit: u32) -> Result<Vec<UsageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT endpoint, recorded_at FROM usage_log
                 WHERE user_id = ?1
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![user.0, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (endpoint, millis) = row.map_err(db_err)?;
            let recorded_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                DokwerkError::Database(format!("invalid timestamp {millis} in usage_log"))
            })?;
            records.push(UsageRecord::new(user, endpoint, recorded_at));
        }
        Ok(records)
    }

    /// Count and insert inside one `BEGIN IMMEDIATE` transaction, which takes
    /// the database write lock up front. Other processes sharing the file
    /// wait on `busy_timeout` instead of reading a stale count.
    #[instrument(skip(self, record, window), fields(user = %record.user, limit))]
    fn append_if_below(
        &self,
        record: &UsageRecord,
        window: &QuotaWindow,
        limit: u64,
    ) -> Result<Admission> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let used_before = count_in(&tx, record.user, window.start, window.end)?;
        let admitted = used_before < limit;
        if admitted {
            insert(&tx, record)?;
        }
        tx.commit().map_err(db_err)?;

        debug!(used_before, admitted, "conditional append");
        Ok(Admission {
            admitted,
            used_before,
        })
    }
}
