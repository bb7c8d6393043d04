use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::database::{map_db_err, opt_ts_col, ts_col, uuid_col, Database, StoreError};
use super::models::{format_timestamp, StoredMessage, TranscriptRecord, TranscriptSnapshot};
use crate::changefeed::{ChangeKind, ChangeTable};

const TRANSCRIPT_COLUMNS: &str = "id, invitation_id, room_id, company_id, job_id, \
     candidate_email, candidate_name, started_at, ended_at, duration_seconds, transcript, \
     created_at, updated_at";

/// Foreign-key column linking a message row to its transcript.
///
/// Rows written before the column rename carry the legacy name only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageColumn {
    Current,
    Legacy,
}

impl MessageColumn {
    pub fn name(&self) -> &'static str {
        match self {
            MessageColumn::Current => "transcript_id",
            MessageColumn::Legacy => "interview_transcript_id",
        }
    }
}

fn transcript_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRecord> {
    Ok(TranscriptRecord {
        id: row.get(0)?,
        invitation_id: uuid_col(row, 1)?,
        room_id: row.get(2)?,
        company_id: row.get(3)?,
        job_id: row.get(4)?,
        candidate_email: row.get(5)?,
        candidate_name: row.get(6)?,
        started_at: opt_ts_col(row, 7)?,
        ended_at: opt_ts_col(row, 8)?,
        duration_seconds: row.get(9)?,
        embedded_transcript: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

impl Database {
    /// Write a full transcript snapshot for one invitation.
    ///
    /// Upserts the metadata row keyed by invitation id, then replaces every
    /// message row of that transcript with `snapshot.messages`. Both steps
    /// commit together or not at all.
    pub async fn save_transcript_snapshot(
        &self,
        snapshot: TranscriptSnapshot,
    ) -> Result<TranscriptRecord, StoreError> {
        let now = format_timestamp(&Utc::now());
        let started_at = snapshot.started_at.as_ref().map(format_timestamp);
        let ended_at = snapshot.ended_at.as_ref().map(format_timestamp);
        let upsert_sql = format!(
            "INSERT INTO interview_transcripts \
             (invitation_id, room_id, company_id, job_id, candidate_email, candidate_name, \
              started_at, ended_at, duration_seconds, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, ?10), COALESCE(?8, ?10), ?9, ?10, ?10) \
             ON CONFLICT(invitation_id) DO UPDATE SET \
                 room_id = excluded.room_id, \
                 company_id = COALESCE(excluded.company_id, interview_transcripts.company_id), \
                 job_id = COALESCE(excluded.job_id, interview_transcripts.job_id), \
                 candidate_email = COALESCE(excluded.candidate_email, interview_transcripts.candidate_email), \
                 candidate_name = COALESCE(excluded.candidate_name, interview_transcripts.candidate_name), \
                 started_at = COALESCE(?7, interview_transcripts.started_at, ?10), \
                 ended_at = COALESCE(?8, ?10), \
                 duration_seconds = ?9, \
                 updated_at = ?10 \
             RETURNING {}",
            TRANSCRIPT_COLUMNS
        );

        let (record, existed) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existed = tx
                    .query_row(
                        "SELECT id FROM interview_transcripts WHERE invitation_id = ?1",
                        [snapshot.invitation_id.to_string()],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?
                    .is_some();

                let record = tx.query_row(
                    &upsert_sql,
                    rusqlite::params![
                        snapshot.invitation_id.to_string(),
                        snapshot.room_id,
                        snapshot.company_id,
                        snapshot.job_id,
                        snapshot.candidate_email,
                        snapshot.candidate_name,
                        started_at,
                        ended_at,
                        snapshot.duration_seconds,
                        now,
                    ],
                    transcript_from_row,
                )?;

                tx.execute(
                    "DELETE FROM transcript_messages \
                     WHERE transcript_id = ?1 OR interview_transcript_id = ?1",
                    [record.id],
                )?;

                {
                    let mut insert = tx.prepare(
                        "INSERT INTO transcript_messages \
                         (transcript_id, position, speaker, text, timestamp, timestamp_ms) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for (position, message) in snapshot.messages.iter().enumerate() {
                        insert.execute(rusqlite::params![
                            record.id,
                            position as i64,
                            message.speaker,
                            message.text,
                            message.timestamp,
                            message.timestamp_ms,
                        ])?;
                    }
                }

                tx.commit()?;
                Ok((record, existed))
            })
            .await
            .map_err(map_db_err)?;

        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.notify(
            ChangeTable::InterviewTranscripts,
            kind,
            record.company_id.clone(),
            record.id,
        )
        .await;

        Ok(record)
    }

    pub async fn transcript_by_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<TranscriptRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM interview_transcripts WHERE invitation_id = ?1",
            TRANSCRIPT_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(&sql, [invitation_id.to_string()], transcript_from_row)
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(map_db_err)
    }

    /// Most recently updated transcript stored under `room_id`
    pub async fn transcript_by_room(
        &self,
        room_id: &str,
    ) -> Result<Option<TranscriptRecord>, StoreError> {
        let room_id = room_id.to_string();
        let sql = format!(
            "SELECT {} FROM interview_transcripts WHERE room_id = ?1 \
             ORDER BY updated_at DESC, id DESC LIMIT 1",
            TRANSCRIPT_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(&sql, [room_id], transcript_from_row)
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(map_db_err)
    }

    /// Message rows linked through `column`, oldest first.
    ///
    /// Rows are ordered on the epoch-millisecond column; rows without one
    /// fall back to `julianday` of the text timestamp, and rows with neither
    /// sort last in submission order.
    pub async fn transcript_messages(
        &self,
        transcript_id: i64,
        column: MessageColumn,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let sql = format!(
            "SELECT speaker, text, timestamp, timestamp_ms FROM ( \
                 SELECT speaker, text, timestamp, timestamp_ms, position, id, \
                        COALESCE(timestamp_ms, \
                                 CAST(ROUND((julianday(timestamp) - 2440587.5) * 86400000.0) AS INTEGER)) \
                            AS sort_ms \
                 FROM transcript_messages WHERE {} = ?1 \
             ) ORDER BY sort_ms IS NULL, sort_ms ASC, position ASC, id ASC",
            column.name()
        );
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let messages = stmt
                    .query_map([transcript_id], |row| {
                        Ok(StoredMessage {
                            speaker: row.get(0)?,
                            text: row.get(1)?,
                            timestamp: row.get(2)?,
                            timestamp_ms: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(messages)
            })
            .await
            .map_err(map_db_err)
    }

    /// Message rows linked to a transcript under either column
    pub async fn transcript_message_count(&self, transcript_id: i64) -> Result<i64, StoreError> {
        self.conn
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM transcript_messages \
                     WHERE transcript_id = ?1 OR interview_transcript_id = ?1",
                    [transcript_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::LocalChangeBus;
    use crate::store::models::parse_timestamp;
    use chrono::{DateTime, TimeZone};
    use std::sync::Arc;

    fn message(speaker: &str, text: &str, ts: &str) -> StoredMessage {
        StoredMessage {
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp: ts.to_string(),
            timestamp_ms: parse_timestamp(ts).map(|t| t.timestamp_millis()),
        }
    }

    fn message_at(text: &str, at: DateTime<Utc>) -> StoredMessage {
        StoredMessage {
            speaker: "agent".to_string(),
            text: text.to_string(),
            timestamp: format_timestamp(&at),
            timestamp_ms: Some(at.timestamp_millis()),
        }
    }

    fn snapshot(invitation_id: Uuid, messages: Vec<StoredMessage>) -> TranscriptSnapshot {
        TranscriptSnapshot {
            invitation_id,
            room_id: invitation_id.to_string(),
            company_id: Some("acme".to_string()),
            job_id: None,
            candidate_email: None,
            candidate_name: None,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            messages,
        }
    }

    #[tokio::test]
    async fn test_snapshot_replaces_messages() {
        let db = Database::open_in_memory(Arc::new(LocalChangeBus::new()))
            .await
            .unwrap();
        let inv = Uuid::new_v4();

        let first = db
            .save_transcript_snapshot(snapshot(
                inv,
                vec![message("agent", "hello", "2025-01-01T00:00:00.000Z")],
            ))
            .await
            .unwrap();
        let second = db
            .save_transcript_snapshot(snapshot(
                inv,
                vec![
                    message("agent", "hello", "2025-01-01T00:00:00.000Z"),
                    message("candidate", "hi", "2025-01-01T00:00:02.000Z"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(db.transcript_message_count(second.id).await.unwrap(), 2);

        let messages = db
            .transcript_messages(second.id, MessageColumn::Current)
            .await
            .unwrap();
        assert_eq!(messages[1].text, "hi");
        assert!(db
            .transcript_messages(second.id, MessageColumn::Legacy)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_started_at_is_kept_across_saves() {
        let db = Database::open_in_memory(Arc::new(LocalChangeBus::new()))
            .await
            .unwrap();
        let inv = Uuid::new_v4();

        let first = db
            .save_transcript_snapshot(snapshot(
                inv,
                vec![message("agent", "a", "2025-01-01T00:00:00.000Z")],
            ))
            .await
            .unwrap();
        let second = db
            .save_transcript_snapshot(snapshot(
                inv,
                vec![message("agent", "a", "2025-01-01T00:00:00.000Z")],
            ))
            .await
            .unwrap();

        assert!(first.started_at.is_some());
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn test_messages_sort_chronologically_across_year_widths() {
        let db = Database::open_in_memory(Arc::new(LocalChangeBus::new()))
            .await
            .unwrap();
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).unwrap();
        let near = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        // "+10000-..." sorts before "2025-..." as text
        assert!(format_timestamp(&far) < format_timestamp(&near));

        let record = db
            .save_transcript_snapshot(snapshot(
                Uuid::new_v4(),
                vec![message_at("later", far), message_at("earlier", near)],
            ))
            .await
            .unwrap();

        let texts: Vec<String> = db
            .transcript_messages(record.id, MessageColumn::Current)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn test_rows_without_epoch_fall_back_to_text_timestamp() {
        let db = Database::open_in_memory(Arc::new(LocalChangeBus::new()))
            .await
            .unwrap();
        let record = db
            .save_transcript_snapshot(snapshot(Uuid::new_v4(), Vec::new()))
            .await
            .unwrap();
        let id = record.id;

        db.conn
            .call(move |conn| {
                for (position, text, ts) in [
                    (0, "second", "2025-01-01T00:00:09.000Z"),
                    (1, "first", "2025-01-01 00:00:01"),
                    (2, "unknown", "not a time"),
                ] {
                    conn.execute(
                        "INSERT INTO transcript_messages \
                         (interview_transcript_id, position, speaker, text, timestamp) \
                         VALUES (?1, ?2, 'agent', ?3, ?4)",
                        rusqlite::params![id, position, text, ts],
                    )?;
                }
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .unwrap();

        let texts: Vec<String> = db
            .transcript_messages(id, MessageColumn::Legacy)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "unknown"]);
    }
}
