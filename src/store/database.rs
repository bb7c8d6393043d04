use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{parse_timestamp, InvitationStatus};
use crate::changefeed::{ChangeKind, ChangeNotification, ChangeSink, ChangeTable};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to encode column: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invitation status cannot be set to {0} here")]
    ForbiddenTransition(InvitationStatus),
}

pub(crate) fn map_db_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> StoreError {
    StoreError::Database(e.to_string())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS interview_invitations (
    id                      TEXT PRIMARY KEY,
    company_id              TEXT NOT NULL,
    job_id                  TEXT,
    candidate_email         TEXT NOT NULL,
    candidate_name          TEXT,
    status                  TEXT NOT NULL DEFAULT 'scheduled',
    expires_at              TEXT,
    interview_completed_at  TEXT,
    final_score             REAL,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS interview_sessions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    invitation_id     TEXT NOT NULL UNIQUE,
    room_id           TEXT NOT NULL,
    company_id        TEXT,
    candidate_id      TEXT,
    job_id            TEXT,
    status            TEXT NOT NULL DEFAULT 'started',
    started_at        TEXT NOT NULL,
    ended_at          TEXT,
    duration_seconds  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_interview_sessions_room ON interview_sessions(room_id);

CREATE TABLE IF NOT EXISTS interview_transcripts (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    invitation_id     TEXT NOT NULL UNIQUE,
    room_id           TEXT NOT NULL,
    company_id        TEXT,
    job_id            TEXT,
    candidate_email   TEXT,
    candidate_name    TEXT,
    started_at        TEXT,
    ended_at          TEXT,
    duration_seconds  INTEGER,
    transcript        TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interview_transcripts_room ON interview_transcripts(room_id);

CREATE TABLE IF NOT EXISTS transcript_messages (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    transcript_id            INTEGER,
    interview_transcript_id  INTEGER,
    position                 INTEGER NOT NULL DEFAULT 0,
    speaker                  TEXT NOT NULL,
    text                     TEXT NOT NULL,
    timestamp                TEXT NOT NULL,
    timestamp_ms             INTEGER
);
CREATE INDEX IF NOT EXISTS idx_transcript_messages_transcript ON transcript_messages(transcript_id);
CREATE INDEX IF NOT EXISTS idx_transcript_messages_legacy ON transcript_messages(interview_transcript_id);

CREATE TABLE IF NOT EXISTS interview_reports (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    invitation_id       TEXT NOT NULL UNIQUE,
    room_id             TEXT,
    company_id          TEXT NOT NULL,
    job_id              TEXT NOT NULL,
    candidate_email     TEXT,
    candidate_name      TEXT,
    questions_asked     INTEGER NOT NULL DEFAULT 0,
    questions_answered  INTEGER NOT NULL DEFAULT 0,
    correct_answers     INTEGER NOT NULL DEFAULT 0,
    wrong_answers       INTEGER NOT NULL DEFAULT 0,
    partial_answers     INTEGER NOT NULL DEFAULT 0,
    total_score         REAL NOT NULL DEFAULT 0,
    performance_metrics TEXT NOT NULL DEFAULT '{}',
    strengths           TEXT NOT NULL DEFAULT '[]',
    weaknesses          TEXT NOT NULL DEFAULT '[]',
    recommendations     TEXT NOT NULL DEFAULT '',
    transcript_summary  TEXT NOT NULL DEFAULT '',
    duration_seconds    INTEGER NOT NULL DEFAULT 0,
    started_at          TEXT NOT NULL,
    ended_at            TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interview_reports_company ON interview_reports(company_id, created_at);
"#;

/// SQLite store shared by the persistence components.
///
/// All statements run on the single `tokio_rusqlite` connection thread, so
/// each `call` closure is atomic with respect to the others. Every committed
/// write is announced on the change sink.
#[derive(Clone)]
pub struct Database {
    pub(super) conn: Connection,
    changes: Arc<dyn ChangeSink>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub async fn open(path: impl AsRef<Path>, changes: Arc<dyn ChangeSink>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        info!("Opening interview database at {}", path.display());
        let conn = Connection::open(path).await.map_err(|e| StoreError::Database(e.to_string()))?;
        Self::init(conn, changes).await
    }

    pub async fn open_in_memory(changes: Arc<dyn ChangeSink>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(|e| StoreError::Database(e.to_string()))?;
        Self::init(conn, changes).await
    }

    async fn init(conn: Connection, changes: Arc<dyn ChangeSink>) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?;

        Ok(Self { conn, changes })
    }

    /// Underlying connection, for maintenance and migration tooling
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Announce a committed row change. Publication failures are logged only;
    /// the write itself has already succeeded.
    pub(crate) async fn notify(
        &self,
        table: ChangeTable,
        kind: ChangeKind,
        company_id: Option<String>,
        record_id: impl ToString,
    ) {
        let notification = ChangeNotification::new(table, kind, company_id, record_id.to_string());
        if let Err(e) = self.changes.publish(&notification).await {
            warn!(
                "Failed to publish {} change for {}: {:#}",
                table.as_str(),
                notification.record_id,
                e
            );
        }
    }
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

pub(super) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, format!("{}: {}", raw, e)))
}

pub(super) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_err(idx, format!("bad timestamp {}", raw)))
}

pub(super) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_err(idx, format!("bad timestamp {}", raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::LocalChangeBus;

    #[tokio::test]
    async fn test_open_creates_parent_dir_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("interviews.db");

        let db = Database::open(&path, Arc::new(LocalChangeBus::new()))
            .await
            .unwrap();
        assert!(path.exists());

        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' \
                     AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(map_db_err)
            .unwrap();

        assert_eq!(
            tables,
            vec![
                "interview_invitations",
                "interview_reports",
                "interview_sessions",
                "interview_transcripts",
                "transcript_messages",
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interviews.db");
        let bus = Arc::new(LocalChangeBus::new());

        Database::open(&path, bus.clone()).await.unwrap();
        assert!(Database::open(&path, bus).await.is_ok());
    }
}
