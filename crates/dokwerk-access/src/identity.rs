// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// API-key directory — resolves a credential to a user id.
//
// Keys are never stored in the clear; the `users` table holds the SHA-256 of
// each key. Key issuance is left to the operator.
//
// Schema:
//   users(
//     id         INTEGER PRIMARY KEY AUTOINCREMENT,
//     name       TEXT NOT NULL,
//     key_hash   TEXT NOT NULL UNIQUE,  -- hex SHA-256 of the API key
//     created_at TEXT NOT NULL          -- ISO 8601
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::UserId;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

/// Lowercase hex SHA-256 of an API key.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn db_err(e: rusqlite::Error) -> DokwerkError {
    DokwerkError::Database(e.to_string())
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        name       TEXT NOT NULL,
        key_hash   TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );
";

/// Strip an optional `Bearer ` scheme and surrounding whitespace.
fn bare_key(credential: &str) -> &str {
    let trimmed = credential.trim();
    trimmed
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or(trimmed)
}

pub struct ApiKeyDirectory {
    conn: Mutex<Connection>,
}

impl ApiKeyDirectory {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("key directory opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

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
            .map_err(|_| DokwerkError::Database("key directory connection poisoned".into()))
    }

    /// Register `name` with the API key `key`. Fails if the key is empty or
    /// already assigned.
    #[instrument(skip(self, key))]
    pub fn add_user(&self, name: &str, key: &str) -> Result<UserId> {
        let key = bare_key(key);
        if key.is_empty() {
            return Err(DokwerkError::InvalidParameter("API key must not be empty".into()));
        }
        if name.trim().is_empty() {
            return Err(DokwerkError::InvalidParameter("user name must not be empty".into()));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (name, key_hash, created_at) VALUES (?1, ?2, ?3)",
            params![name.trim(), hash_key(key), Utc::now().to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DokwerkError::InvalidParameter("API key is already assigned".into())
            }
            other => db_err(other),
        })?;

        let id = UserId(conn.last_insert_rowid());
        info!(user = %id, "user registered");
        Ok(id)
    }

    /// Resolve a credential (`Bearer <key>` or a bare key) to its user.
    #[instrument(skip_all)]
    pub fn resolve(&self, credential: &str) -> Result<UserId> {
        let key = bare_key(credential);
        if key.is_empty() {
            return Err(DokwerkError::Unauthenticated("API key required".into()));
        }

        let conn = self.lock()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE key_hash = ?1",
                params![hash_key(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match id {
            Some(id) => {
                debug!(user = id, "credential resolved");
                Ok(UserId(id))
            }
            None => Err(DokwerkError::Unauthenticated("invalid API key".into())),
        }
    }

    /// Display name of `user`, if registered.
    pub fn name_of(&self, user: UserId) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![user.0],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    pub fn user_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_value() {
        // SHA-256("hello")
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hash_key("hello"), expected);
    }

    #[test]
    fn resolves_bearer_and_bare_keys() {
        let dir = ApiKeyDirectory::open_in_memory().unwrap();
        let id = dir.add_user("alice", "API_0f3a9c").unwrap();

        assert_eq!(dir.resolve("API_0f3a9c").unwrap(), id);
        assert_eq!(dir.resolve("Bearer API_0f3a9c").unwrap(), id);
        assert_eq!(dir.resolve("  Bearer   API_0f3a9c ").unwrap(), id);
        assert_eq!(dir.name_of(id).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn unknown_or_missing_keys_are_unauthenticated() {
        let dir = ApiKeyDirectory::open_in_memory().unwrap();
        dir.add_user("alice", "API_1").unwrap();

        for credential in ["", "Bearer ", "API_2"] {
            let err = dir.resolve(credential).unwrap_err();
            assert!(matches!(err, DokwerkError::Unauthenticated(_)), "{credential:?}");
            assert_eq!(err.kind().status_code(), 401);
        }
    }

    #[test]
    fn keys_are_unique_and_hashed() {
        let dir = ApiKeyDirectory::open_in_memory().unwrap();
        dir.add_user("alice", "API_dup").unwrap();
        let err = dir.add_user("bob", "API_dup").unwrap_err();
        assert!(matches!(err, DokwerkError::InvalidParameter(_)));
        assert_eq!(dir.user_count().unwrap(), 1);

        let conn = dir.lock().unwrap();
        let stored: String = conn
            .query_row("SELECT key_hash FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, hash_key("API_dup"));
    }

    #[test]
    fn directory_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keys.db");
        let id = ApiKeyDirectory::open(&path).unwrap().add_user("carol", "API_c").unwrap();
        assert_eq!(ApiKeyDirectory::open(&path).unwrap().resolve("API_c").unwrap(), id);
    }
}
