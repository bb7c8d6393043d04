//! Interview performance reports

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{parse_uuid, Database, ReportRecord, ReportUpsert, StoreError};
use crate::transcript::parse_datetime;

pub const DEFAULT_LIST_LIMIT: u32 = 10;
pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid {field} format. Expected a UUID, got \"{value}\"")]
    InvalidUuid { field: &'static str, value: String },

    #[error("Invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Either invitation_id or company_id is required")]
    MissingLookup,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReportError {
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ReportError::MissingFields(fields) => fields.first().copied(),
            ReportError::InvalidUuid { field, .. } | ReportError::InvalidField { field, .. } => {
                Some(field)
            }
            ReportError::MissingLookup | ReportError::Store(_) => None,
        }
    }
}

/// Flat metrics payload posted when an interview ends
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveReportRequest {
    pub invitation_id: Option<String>,
    pub room_id: Option<String>,
    pub company_id: Option<String>,
    pub job_id: Option<String>,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
    pub questions_asked: Option<i64>,
    pub questions_answered: Option<i64>,
    pub correct_answers: Option<i64>,
    pub wrong_answers: Option<i64>,
    pub partial_answers: Option<i64>,
    pub total_score: Option<f64>,
    pub performance_metrics: Option<Value>,
    pub strengths: Option<Vec<String>>,
    pub weaknesses: Option<Vec<String>>,
    pub recommendations: Option<String>,
    pub transcript_summary: Option<String>,
    pub duration_seconds: Option<i64>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn count(field: &'static str, value: Option<i64>) -> Result<i64, ReportError> {
    match value.unwrap_or(0) {
        n if n < 0 => Err(ReportError::InvalidField {
            field,
            message: format!("must not be negative, got {}", n),
        }),
        n => Ok(n),
    }
}

fn time_or_now(
    field: &'static str,
    value: &Option<String>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ReportError> {
    match present(value) {
        Some(raw) => parse_datetime(raw).ok_or_else(|| ReportError::InvalidField {
            field,
            message: format!("\"{}\" is not an ISO-8601 timestamp", raw),
        }),
        None => Ok(now),
    }
}

impl SaveReportRequest {
    fn into_upsert(self, now: DateTime<Utc>) -> Result<ReportUpsert, ReportError> {
        let missing: Vec<&'static str> = [
            ("invitation_id", present(&self.invitation_id).is_none()),
            ("company_id", present(&self.company_id).is_none()),
            ("job_id", present(&self.job_id).is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();
        if !missing.is_empty() {
            return Err(ReportError::MissingFields(missing));
        }

        let raw_id = present(&self.invitation_id).unwrap_or_default();
        let invitation_id = parse_uuid(raw_id).ok_or_else(|| ReportError::InvalidUuid {
            field: "invitation_id",
            value: raw_id.to_string(),
        })?;

        let total_score = self.total_score.unwrap_or(0.0);
        if !total_score.is_finite() {
            return Err(ReportError::InvalidField {
                field: "total_score",
                message: "must be a finite number".to_string(),
            });
        }

        Ok(ReportUpsert {
            invitation_id,
            room_id: present(&self.room_id).map(str::to_string),
            company_id: present(&self.company_id).unwrap_or_default().to_string(),
            job_id: present(&self.job_id).unwrap_or_default().to_string(),
            candidate_email: present(&self.candidate_email).map(str::to_string),
            candidate_name: present(&self.candidate_name).map(str::to_string),
            questions_asked: count("questions_asked", self.questions_asked)?,
            questions_answered: count("questions_answered", self.questions_answered)?,
            correct_answers: count("correct_answers", self.correct_answers)?,
            wrong_answers: count("wrong_answers", self.wrong_answers)?,
            partial_answers: count("partial_answers", self.partial_answers)?,
            total_score,
            performance_metrics: self
                .performance_metrics
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| Value::Object(Default::default())),
            strengths: self.strengths.unwrap_or_default(),
            weaknesses: self.weaknesses.unwrap_or_default(),
            recommendations: self.recommendations.unwrap_or_default(),
            transcript_summary: self.transcript_summary.unwrap_or_default(),
            duration_seconds: count("duration_seconds", self.duration_seconds)?,
            started_at: time_or_now("started_at", &self.started_at, now)?,
            ended_at: time_or_now("ended_at", &self.ended_at, now)?,
        })
    }
}

/// Saves and reads interview reports.
///
/// A report is one computed artifact per invitation. Saving also records the
/// final score on the invitation and closes the room's session; both are
/// best-effort.
pub struct ReportService {
    db: Database,
}

impl ReportService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, request: SaveReportRequest) -> Result<ReportRecord, ReportError> {
        let upsert = request.into_upsert(Utc::now())?;
        let invitation_id = upsert.invitation_id;

        info!(
            "Saving interview report for invitation {} (score {})",
            invitation_id, upsert.total_score
        );
        let report = self.db.upsert_report(upsert).await?;

        match self.db.record_final_score(invitation_id, report.total_score).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Invitation {} not found, final score not recorded",
                invitation_id
            ),
            Err(e) => warn!(
                "Failed to record final score for invitation {}: {}",
                invitation_id, e
            ),
        }

        if let Some(room_id) = report.room_id.as_deref() {
            if let Err(e) = self
                .db
                .complete_sessions_for_room(room_id, report.ended_at, Some(report.duration_seconds))
                .await
            {
                warn!("Failed to complete session for room {}: {}", room_id, e);
            }
        }

        Ok(report)
    }

    pub async fn for_invitation(&self, invitation_id: &str) -> Result<Option<ReportRecord>, ReportError> {
        let id = parse_uuid(invitation_id.trim()).ok_or_else(|| ReportError::InvalidUuid {
            field: "invitation_id",
            value: invitation_id.to_string(),
        })?;
        Ok(self.db.report_by_invitation(id).await?)
    }

    /// Newest first; `limit` defaults to 10 and is clamped to 1..=100
    pub async fn for_company(
        &self,
        company_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ReportRecord>, ReportError> {
        let limit = clamp_limit(limit);
        Ok(self.db.reports_for_company(company_id, limit).await?)
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}
