//! Change-record store for continuous backups.
//!
//! A small sqlite database holds one row per changed entry, keyed by
//! job and schedule UUID with a uniqueness constraint on
//! `(jobUUID, name)`. A version row in the `meta` table guards the
//! schema; on mismatch the store is discarded and recreated.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use snafu::ResultExt;
use tracing::info;
use uuid::Uuid;

use crate::error::{self, Result};

const CONTINUOUS_VERSION: i64 = 1;

const TABLE_DEFINITION: &str = "\
CREATE TABLE IF NOT EXISTS meta(
  name  TEXT UNIQUE,
  value TEXT
);
INSERT OR IGNORE INTO meta (name,value) VALUES ('version',1);
INSERT OR IGNORE INTO meta (name,value) VALUES ('datetime',DATETIME('now'));

CREATE TABLE IF NOT EXISTS names(
  id           INTEGER PRIMARY KEY,
  jobUUID      TEXT NOT NULL,
  scheduleUUID TEXT NOT NULL,
  name         TEXT NOT NULL,
  UNIQUE (jobUUID,name)
);
CREATE INDEX IF NOT EXISTS namesIndex ON names (jobUUID,scheduleUUID,name);
";

pub struct ContinuousDb {
    conn: Connection,
    path: PathBuf,
}

impl ContinuousDb {
    /// Open (or create) the store at `path`, discarding it when the
    /// schema version does not match.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context(error::DatabaseSnafu)?;
        conn.execute_batch(TABLE_DEFINITION)
            .context(error::DatabaseSnafu)?;

        let version = read_version(&conn)?;
        if version == Some(CONTINUOUS_VERSION) {
            return Ok(ContinuousDb {
                conn,
                path: path.to_path_buf(),
            });
        }

        info!(
            message = "Continuous store version mismatch, recreating.",
            path = ?path,
            found = ?version,
            expected = CONTINUOUS_VERSION,
        );
        drop(conn);
        std::fs::remove_file(path).context(error::IoSnafu { path })?;
        let conn = Connection::open(path).context(error::DatabaseSnafu)?;
        conn.execute_batch(TABLE_DEFINITION)
            .context(error::DatabaseSnafu)?;
        Ok(ContinuousDb {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a changed entry. Duplicate `(job, name)` rows are
    /// ignored; returns whether a row was inserted.
    pub fn add(&self, job: &Uuid, schedule: &Uuid, name: &str) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO names (jobUUID,scheduleUUID,name) VALUES (?1,?2,?3)",
                (job.to_string(), schedule.to_string(), name),
            )
            .context(error::DatabaseSnafu)?;
        Ok(inserted > 0)
    }

    pub fn exists(&self, job: &Uuid, schedule: &Uuid, name: &str) -> Result<bool> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM names WHERE jobUUID=?1 AND scheduleUUID=?2 AND name=?3",
                (job.to_string(), schedule.to_string(), name),
                |row| row.get(0),
            )
            .optional()
            .context(error::DatabaseSnafu)?;
        Ok(id.is_some())
    }

    /// Atomically read and delete the oldest row for `(job, schedule)`.
    pub fn next(&mut self, job: &Uuid, schedule: &Uuid) -> Result<Option<(i64, String)>> {
        let tx = self.conn.transaction().context(error::DatabaseSnafu)?;
        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT id,name FROM names \
                 WHERE jobUUID=?1 AND scheduleUUID=?2 ORDER BY id LIMIT 1",
                (job.to_string(), schedule.to_string()),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context(error::DatabaseSnafu)?;
        if let Some((id, _)) = &row {
            tx.execute("DELETE FROM names WHERE id=?1", [id])
                .context(error::DatabaseSnafu)?;
        }
        tx.commit().context(error::DatabaseSnafu)?;
        Ok(row)
    }

    /// Drop every row recorded for `job`, across all of its schedules.
    /// Used when the job itself is removed. Returns the number of rows
    /// deleted.
    pub fn purge(&self, job: &Uuid) -> Result<u64> {
        let removed = self
            .conn
            .execute("DELETE FROM names WHERE jobUUID=?1", [job.to_string()])
            .context(error::DatabaseSnafu)?;
        Ok(removed as u64)
    }

    pub fn count(&self, job: &Uuid, schedule: &Uuid) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(id) FROM names WHERE jobUUID=?1 AND scheduleUUID=?2",
                (job.to_string(), schedule.to_string()),
                |row| row.get(0),
            )
            .context(error::DatabaseSnafu)?;
        Ok(count as u64)
    }
}

fn read_version(conn: &Connection) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE name='version'", [], |row| {
            row.get(0)
        })
        .optional()
        .context(error::DatabaseSnafu)?;
    Ok(value.and_then(|text| text.parse().ok()))
}
