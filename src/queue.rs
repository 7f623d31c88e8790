use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::entity::EntityType;
use crate::heartbeat::Heartbeat;

/// Overlapping invocations wait this long for the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stats recorded next to a queued heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedStats {
    pub language: Option<String>,
    pub lines: Option<u64>,
    pub dependencies: Option<Vec<String>>,
}

impl From<&Heartbeat> for QueuedStats {
    fn from(heartbeat: &Heartbeat) -> Self {
        Self {
            language: heartbeat.language.clone(),
            lines: heartbeat.lines,
            dependencies: heartbeat.dependencies.clone(),
        }
    }
}

/// Offline storage for heartbeats that could not be delivered.
pub trait QueueOps {
    /// Stores one heartbeat under a fresh UUID.
    fn push(&self, heartbeat: &Heartbeat) -> Result<(), QueueError>;

    /// Stores all heartbeats or none of them.
    fn push_many(&self, heartbeats: &[Heartbeat]) -> Result<(), QueueError>;

    /// Removes and returns the oldest heartbeat.
    fn pop(&self) -> Result<Option<Heartbeat>, QueueError>;

    /// Removes and returns up to `limit` of the oldest heartbeats.
    fn pop_many(&self, limit: usize) -> Result<Vec<Heartbeat>, QueueError>;

    fn count(&self) -> Result<usize, QueueError>;
}

pub struct Queue {
    conn: Connection,
}

impl QueueOps for Queue {
    fn push(&self, heartbeat: &Heartbeat) -> Result<(), QueueError> {
        self.push_many(std::slice::from_ref(heartbeat))
    }

    fn push_many(&self, heartbeats: &[Heartbeat]) -> Result<(), QueueError> {
        if heartbeats.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO heartbeat_2 (id, heartbeat, stats, plugin) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for heartbeat in heartbeats {
                let id = uuid::Uuid::new_v4().to_string();
                let data = serde_json::to_string(heartbeat)?;
                let stats = serde_json::to_string(&QueuedStats::from(heartbeat))?;
                stmt.execute(params![id, data, stats, heartbeat.plugin])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            operation = "push",
            pushed = heartbeats.len(),
            queue_size = self.count().unwrap_or_default(),
            "Heartbeats added to offline queue"
        );
        Ok(())
    }

    fn pop(&self) -> Result<Option<Heartbeat>, QueueError> {
        Ok(self.pop_many(1)?.into_iter().next())
    }

    fn pop_many(&self, limit: usize) -> Result<Vec<Heartbeat>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // IMMEDIATE takes the write lock up front so two processes never read the same rows
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let rows: Vec<(String, String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, heartbeat, plugin FROM heartbeat_2 ORDER BY rowid ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut heartbeats = Vec::with_capacity(rows.len());
        for (id, data, plugin) in rows {
            tx.execute("DELETE FROM heartbeat_2 WHERE id = ?1", params![id])?;
            match serde_json::from_str::<Heartbeat>(&data) {
                Ok(mut heartbeat) => {
                    heartbeat.plugin = plugin;
                    heartbeats.push(heartbeat);
                }
                Err(e) => {
                    tracing::warn!(operation = "pop", heartbeat_id = %id, error = %e, "Dropping undecodable queued heartbeat");
                }
            }
        }
        tx.commit()?;

        if !heartbeats.is_empty() {
            tracing::debug!(operation = "pop", popped = heartbeats.len(), "Heartbeats removed from offline queue");
        }
        Ok(heartbeats)
    }

    fn count(&self) -> Result<usize, QueueError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM heartbeat_2", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl Queue {
    /// Opens (creating if needed) the queue database at `db_path`.
    pub fn with_path(db_path: PathBuf) -> Result<Self, QueueError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init_database(&conn)?;

        Ok(Self { conn })
    }

    /// Like [`Queue::with_path`], but an unusable database is logged at
    /// debug level and reported as `None`.
    pub fn connect(db_path: &Path) -> Option<Self> {
        match Self::with_path(db_path.to_path_buf()) {
            Ok(queue) => Some(queue),
            Err(e) => {
                tracing::debug!(path = %db_path.display(), error = %e, "Unable to open offline queue");
                None
            }
        }
    }

    fn init_database(conn: &Connection) -> Result<(), QueueError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS heartbeat_2 (
                id TEXT PRIMARY KEY,
                heartbeat TEXT NOT NULL,
                stats TEXT NOT NULL,
                plugin TEXT
            )",
            [],
        )?;

        Self::migrate_legacy_table(conn)?;
        Ok(())
    }

    /// Moves rows from the old `heartbeat` table into `heartbeat_2` and drops it.
    fn migrate_legacy_table(conn: &Connection) -> Result<(), QueueError> {
        let legacy: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'heartbeat'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if legacy.is_none() {
            return Ok(());
        }

        let tx = conn.unchecked_transaction()?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT file, time, project, language, lines, branch, is_write, plugin FROM heartbeat",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LegacyRow {
                        file: row.get(0)?,
                        time: row.get(1)?,
                        project: row.get(2)?,
                        language: row.get(3)?,
                        lines: row.get(4)?,
                        branch: row.get(5)?,
                        is_write: row.get(6)?,
                        plugin: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let migrated = rows.len();
        {
            let mut insert = tx.prepare(
                "INSERT INTO heartbeat_2 (id, heartbeat, stats, plugin) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                let heartbeat = row.into_heartbeat();
                insert.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    serde_json::to_string(&heartbeat)?,
                    serde_json::to_string(&QueuedStats::from(&heartbeat))?,
                    heartbeat.plugin,
                ])?;
            }
        }
        tx.execute("DROP TABLE heartbeat", [])?;
        tx.commit()?;

        tracing::info!(operation = "migrate", migrated, "Migrated legacy offline queue");
        Ok(())
    }
}

/// Pushes `heartbeats` from async code. Failures are logged, never returned.
pub async fn enqueue(db_path: PathBuf, heartbeats: Vec<Heartbeat>) {
    if heartbeats.is_empty() {
        return;
    }
    let result = tokio::task::spawn_blocking(move || -> Result<(), QueueError> {
        match Queue::connect(&db_path) {
            Some(queue) => queue.push_many(&heartbeats),
            None => Ok(()),
        }
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(operation = "push", error = %e, "Unable to queue heartbeats"),
        Err(e) => tracing::debug!(operation = "push", error = %e, "Queue task failed"),
    }
}

/// Pops the oldest heartbeat from async code; `None` when empty or unusable.
pub async fn dequeue(db_path: PathBuf) -> Option<Heartbeat> {
    let result = tokio::task::spawn_blocking(move || -> Result<Option<Heartbeat>, QueueError> {
        match Queue::connect(&db_path) {
            Some(queue) => queue.pop(),
            None => Ok(None),
        }
    })
    .await;

    match result {
        Ok(Ok(heartbeat)) => heartbeat,
        Ok(Err(e)) => {
            tracing::debug!(operation = "pop", error = %e, "Unable to pop queued heartbeat");
            None
        }
        Err(e) => {
            tracing::debug!(operation = "pop", error = %e, "Queue task failed");
            None
        }
    }
}

struct LegacyRow {
    file: String,
    time: f64,
    project: Option<String>,
    language: Option<String>,
    lines: Option<i64>,
    branch: Option<String>,
    is_write: Option<bool>,
    plugin: Option<String>,
}

impl LegacyRow {
    fn into_heartbeat(self) -> Heartbeat {
        Heartbeat {
            time: self.time,
            entity: self.file,
            entity_type: EntityType::File,
            category: None,
            is_write: self.is_write.unwrap_or(false),
            project: self.project,
            branch: self.branch,
            language: self.language,
            dependencies: None,
            lines: self.lines.and_then(|l| u64::try_from(l).ok()),
            lineno: None,
            cursorpos: None,
            user_agent: crate::user_agent::user_agent(self.plugin.as_deref()),
            plugin: self.plugin,
        }
    }
}
