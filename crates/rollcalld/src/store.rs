//! Durable attendance table in SQLite.
//!
//! One row per (first_name, last_name, date). Writes are single-statement
//! upserts, so a reader sees either the old row or the new one.

use chrono::NaiveDate;
use parking_lot::Mutex;
use rollcall_core::{AttendanceRecord, AttendanceStats, AttendanceStatus};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const SELECT_COLUMNS: &str = "SELECT first_name, last_name, date, status, lateness_minutes FROM attendance";

/// Thread-safe attendance table.
pub struct AttendanceStore {
    conn: Mutex<Connection>,
}

impl AttendanceStore {
    /// Open (or create) the database file and its schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        tracing::info!(path = %path.display(), "opening attendance store");
        let conn = Connection::open(path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!(error = %e, "WAL mode unavailable; using default journal");
        }
        Self::with_connection(conn)
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attendance (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name       TEXT    NOT NULL,
                last_name        TEXT    NOT NULL,
                date             TEXT    NOT NULL,
                status           TEXT    NOT NULL CHECK (status IN ('present', 'late', 'absent')),
                lateness_minutes INTEGER NOT NULL DEFAULT 0 CHECK (lateness_minutes >= 0),
                updated_at       TEXT    NOT NULL DEFAULT (datetime('now')),
                UNIQUE (first_name, last_name, date)
            );
            CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance (date);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert the row, or overwrite status and lateness of the existing row
    /// with the same (first_name, last_name, date).
    pub fn upsert(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO attendance (first_name, last_name, date, status, lateness_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (first_name, last_name, date) DO UPDATE SET
                 status = excluded.status,
                 lateness_minutes = excluded.lateness_minutes,
                 updated_at = datetime('now')",
            params![
                record.first_name,
                record.last_name,
                record.date,
                record.status.as_str(),
                record.lateness_minutes,
            ],
        )?;
        Ok(())
    }

    /// Every row, newest date first, then by name.
    pub fn query_all(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY date DESC, last_name ASC, first_name ASC"
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rows for one day, by name.
    pub fn query_by_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE date = ?1 ORDER BY last_name ASC, first_name ASC"
        ))?;
        let rows = stmt.query_map(params![date], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Days with at least one row, newest first.
    pub fn distinct_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT date FROM attendance ORDER BY date DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, NaiveDate>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn aggregate_counts(&self) -> Result<AttendanceStats, StoreError> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM (SELECT DISTINCT first_name, last_name FROM attendance)),
                (SELECT COUNT(*) FROM attendance WHERE status = 'present'),
                (SELECT COUNT(*) FROM attendance WHERE status = 'late'),
                (SELECT COUNT(*) FROM attendance WHERE status = 'absent')",
            [],
            |row| {
                Ok(AttendanceStats {
                    total: row.get::<_, i64>(0)? as u64,
                    present: row.get::<_, i64>(1)? as u64,
                    late: row.get::<_, i64>(2)? as u64,
                    absent: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Make every statement fail until [`Self::restore_for_testing`].
    #[cfg(test)]
    pub(crate) fn take_offline_for_testing(&self) {
        self.conn
            .lock()
            .execute_batch("ALTER TABLE attendance RENAME TO attendance_offline;")
            .unwrap();
    }

    #[cfg(test)]
    pub(crate) fn restore_for_testing(&self) {
        self.conn
            .lock()
            .execute_batch("ALTER TABLE attendance_offline RENAME TO attendance;")
            .unwrap();
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status: String = row.get(3)?;
    let status = status.parse::<AttendanceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(AttendanceRecord {
        first_name: row.get(0)?,
        last_name: row.get(1)?,
        date: row.get(2)?,
        status,
        lateness_minutes: row.get(4)?,
    })
}
