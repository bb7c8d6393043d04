use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::database::{map_db_err, opt_ts_col, ts_col, uuid_col, Database, StoreError};
use super::models::{format_timestamp, NewSession, SessionRecord, SessionStatus};
use crate::changefeed::{ChangeKind, ChangeTable};

const SESSION_COLUMNS: &str = "id, invitation_id, room_id, company_id, candidate_id, job_id, \
     status, started_at, ended_at, duration_seconds";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(6)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        invitation_id: uuid_col(row, 1)?,
        room_id: row.get(2)?,
        company_id: row.get(3)?,
        candidate_id: row.get(4)?,
        job_id: row.get(5)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Started),
        started_at: ts_col(row, 7)?,
        ended_at: opt_ts_col(row, 8)?,
        duration_seconds: row.get(9)?,
    })
}

impl Database {
    /// Record which room serves an invitation. One session per invitation;
    /// a repeated start rebinds the room and restarts the session.
    pub async fn upsert_session(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let now = format_timestamp(&Utc::now());
        let sql = format!(
            "INSERT INTO interview_sessions \
             (invitation_id, room_id, company_id, candidate_id, job_id, status, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'started', ?6) \
             ON CONFLICT(invitation_id) DO UPDATE SET \
                 room_id = excluded.room_id, \
                 company_id = COALESCE(excluded.company_id, interview_sessions.company_id), \
                 candidate_id = COALESCE(excluded.candidate_id, interview_sessions.candidate_id), \
                 job_id = COALESCE(excluded.job_id, interview_sessions.job_id), \
                 status = 'started', \
                 started_at = excluded.started_at, \
                 ended_at = NULL, \
                 duration_seconds = NULL \
             RETURNING {}",
            SESSION_COLUMNS
        );

        let (session, existed) = self
            .conn
            .call(move |conn| {
                let existed = conn
                    .query_row(
                        "SELECT 1 FROM interview_sessions WHERE invitation_id = ?1",
                        [new.invitation_id.to_string()],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                let session = conn.query_row(
                    &sql,
                    rusqlite::params![
                        new.invitation_id.to_string(),
                        new.room_id,
                        new.company_id,
                        new.candidate_id,
                        new.job_id,
                        now,
                    ],
                    session_from_row,
                )?;
                Ok((session, existed))
            })
            .await
            .map_err(map_db_err)?;

        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.notify(
            ChangeTable::InterviewSessions,
            kind,
            session.company_id.clone(),
            session.id,
        )
        .await;

        Ok(session)
    }

    pub async fn session_for_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM interview_sessions WHERE invitation_id = ?1",
            SESSION_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let session = conn
                    .query_row(&sql, [invitation_id.to_string()], session_from_row)
                    .optional()?;
                Ok(session)
            })
            .await
            .map_err(map_db_err)
    }

    /// Room id recorded at session start, if any
    pub async fn room_for_invitation(&self, invitation_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .session_for_invitation(invitation_id)
            .await?
            .map(|s| s.room_id)
            .filter(|room| !room.is_empty()))
    }

    /// Invitation most recently bound to `room_id`
    pub async fn invitation_for_room(&self, room_id: &str) -> Result<Option<Uuid>, StoreError> {
        let room_id = room_id.to_string();
        self.conn
            .call(move |conn| {
                let id = conn
                    .query_row(
                        "SELECT invitation_id FROM interview_sessions WHERE room_id = ?1 \
                         ORDER BY started_at DESC, id DESC LIMIT 1",
                        [room_id],
                        |row| uuid_col(row, 0),
                    )
                    .optional()?;
                Ok(id)
            })
            .await
            .map_err(map_db_err)
    }

    /// Mark every session bound to `room_id` completed. Returns rows touched.
    pub async fn complete_sessions_for_room(
        &self,
        room_id: &str,
        ended_at: DateTime<Utc>,
        duration_seconds: Option<i64>,
    ) -> Result<usize, StoreError> {
        let room_id = room_id.to_string();
        let ended_at = format_timestamp(&ended_at);

        let touched = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "UPDATE interview_sessions \
                     SET status = 'completed', ended_at = ?1, \
                         duration_seconds = COALESCE(?2, duration_seconds) \
                     WHERE room_id = ?3 \
                     RETURNING id, company_id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![ended_at, duration_seconds, room_id], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_db_err)?;

        for (id, company_id) in &touched {
            self.notify(
                ChangeTable::InterviewSessions,
                ChangeKind::Update,
                company_id.clone(),
                id,
            )
            .await;
        }

        Ok(touched.len())
    }
}
