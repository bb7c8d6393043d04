use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::database::{map_db_err, ts_col, uuid_col, Database, StoreError};
use super::models::{format_timestamp, ReportRecord, ReportUpsert};
use crate::changefeed::{ChangeKind, ChangeTable};

const REPORT_COLUMNS: &str = "id, invitation_id, room_id, company_id, job_id, candidate_email, \
     candidate_name, questions_asked, questions_answered, correct_answers, wrong_answers, \
     partial_answers, total_score, performance_metrics, strengths, weaknesses, recommendations, \
     transcript_summary, duration_seconds, started_at, ended_at, created_at, updated_at";

fn json_col<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn report_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportRecord> {
    Ok(ReportRecord {
        id: row.get(0)?,
        invitation_id: uuid_col(row, 1)?,
        room_id: row.get(2)?,
        company_id: row.get(3)?,
        job_id: row.get(4)?,
        candidate_email: row.get(5)?,
        candidate_name: row.get(6)?,
        questions_asked: row.get(7)?,
        questions_answered: row.get(8)?,
        correct_answers: row.get(9)?,
        wrong_answers: row.get(10)?,
        partial_answers: row.get(11)?,
        total_score: row.get(12)?,
        performance_metrics: json_col(row, 13)?,
        strengths: json_col(row, 14)?,
        weaknesses: json_col(row, 15)?,
        recommendations: row.get(16)?,
        transcript_summary: row.get(17)?,
        duration_seconds: row.get(18)?,
        started_at: ts_col(row, 19)?,
        ended_at: ts_col(row, 20)?,
        created_at: ts_col(row, 21)?,
        updated_at: ts_col(row, 22)?,
    })
}

impl Database {
    /// Insert or replace the report for an invitation; `created_at` survives
    /// updates.
    pub async fn upsert_report(&self, report: ReportUpsert) -> Result<ReportRecord, StoreError> {
        let now = format_timestamp(&Utc::now());
        let metrics = serde_json::to_string(&report.performance_metrics)?;
        let strengths = serde_json::to_string(&report.strengths)?;
        let weaknesses = serde_json::to_string(&report.weaknesses)?;
        let started_at = format_timestamp(&report.started_at);
        let ended_at = format_timestamp(&report.ended_at);
        let sql = format!(
            "INSERT INTO interview_reports \
             (invitation_id, room_id, company_id, job_id, candidate_email, candidate_name, \
              questions_asked, questions_answered, correct_answers, wrong_answers, \
              partial_answers, total_score, performance_metrics, strengths, weaknesses, \
              recommendations, transcript_summary, duration_seconds, started_at, ended_at, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                     ?17, ?18, ?19, ?20, ?21, ?21) \
             ON CONFLICT(invitation_id) DO UPDATE SET \
                 room_id = excluded.room_id, \
                 company_id = excluded.company_id, \
                 job_id = excluded.job_id, \
                 candidate_email = excluded.candidate_email, \
                 candidate_name = excluded.candidate_name, \
                 questions_asked = excluded.questions_asked, \
                 questions_answered = excluded.questions_answered, \
                 correct_answers = excluded.correct_answers, \
                 wrong_answers = excluded.wrong_answers, \
                 partial_answers = excluded.partial_answers, \
                 total_score = excluded.total_score, \
                 performance_metrics = excluded.performance_metrics, \
                 strengths = excluded.strengths, \
                 weaknesses = excluded.weaknesses, \
                 recommendations = excluded.recommendations, \
                 transcript_summary = excluded.transcript_summary, \
                 duration_seconds = excluded.duration_seconds, \
                 started_at = excluded.started_at, \
                 ended_at = excluded.ended_at, \
                 updated_at = excluded.updated_at \
             RETURNING {}",
            REPORT_COLUMNS
        );

        let (record, existed) = self
            .conn
            .call(move |conn| {
                let existed = conn
                    .query_row(
                        "SELECT 1 FROM interview_reports WHERE invitation_id = ?1",
                        [report.invitation_id.to_string()],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                let record = conn.query_row(
                    &sql,
                    rusqlite::params![
                        report.invitation_id.to_string(),
                        report.room_id,
                        report.company_id,
                        report.job_id,
                        report.candidate_email,
                        report.candidate_name,
                        report.questions_asked,
                        report.questions_answered,
                        report.correct_answers,
                        report.wrong_answers,
                        report.partial_answers,
                        report.total_score,
                        metrics,
                        strengths,
                        weaknesses,
                        report.recommendations,
                        report.transcript_summary,
                        report.duration_seconds,
                        started_at,
                        ended_at,
                        now,
                    ],
                    report_from_row,
                )?;
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
            ChangeTable::InterviewReports,
            kind,
            Some(record.company_id.clone()),
            record.id,
        )
        .await;

        Ok(record)
    }

    pub async fn report_by_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<ReportRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM interview_reports WHERE invitation_id = ?1",
            REPORT_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(&sql, [invitation_id.to_string()], report_from_row)
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(map_db_err)
    }

    /// Newest reports for a company
    pub async fn reports_for_company(
        &self,
        company_id: &str,
        limit: u32,
    ) -> Result<Vec<ReportRecord>, StoreError> {
        let company_id = company_id.to_string();
        let sql = format!(
            "SELECT {} FROM interview_reports WHERE company_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            REPORT_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let reports = stmt
                    .query_map(rusqlite::params![company_id, limit], report_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(reports)
            })
            .await
            .map_err(map_db_err)
    }
}
