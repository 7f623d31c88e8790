//! Persisted HTTP session shared between invocations.
//!
//! Losing the session only costs a fresh handshake, so every failure here is
//! logged and swallowed.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credentials parsed from a `DOMAIN\user:pass` proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct NtlmCredentials {
    pub username: String,
    pub password: String,
}

impl NtlmCredentials {
    /// Splits on the last `:`; a missing password is empty.
    pub fn from_proxy(proxy: &str) -> Self {
        match proxy.rsplit_once(':') {
            Some((username, password)) => Self {
                username: username.to_string(),
                password: password.to_string(),
            },
            None => Self {
                username: proxy.to_string(),
                password: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `Cookie` header value for the API origin.
    #[serde(default)]
    pub cookies: Option<String>,
    /// Only lives for the current invocation.
    #[serde(skip)]
    pub ntlm: Option<NtlmCredentials>,
}

pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute("CREATE TABLE IF NOT EXISTS session (value TEXT)", [])?;
        Ok(conn)
    }

    /// The stored session, or a fresh one when nothing usable is stored.
    pub fn get(&self) -> Session {
        match self.try_get() {
            Ok(session) => session.unwrap_or_default(),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Unable to load cached session");
                Session::default()
            }
        }
    }

    fn try_get(&self) -> Result<Option<Session>, SessionError> {
        let conn = self.connect()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM session LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Replaces the stored session. Last writer wins.
    pub fn save(&self, session: &Session) {
        if let Err(e) = self.try_save(session) {
            tracing::debug!(path = %self.path.display(), error = %e, "Unable to save session");
        }
    }

    fn try_save(&self, session: &Session) -> Result<(), SessionError> {
        let value = serde_json::to_string(session)?;
        let conn = self.connect()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM session", [])?;
        tx.execute("INSERT INTO session (value) VALUES (?1)", params![value])?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete(&self) {
        let result = self
            .connect()
            .and_then(|conn| conn.execute("DELETE FROM session", []).map_err(SessionError::from));
        if let Err(e) = result {
            tracing::debug!(path = %self.path.display(), error = %e, "Unable to delete session");
        }
    }
}
