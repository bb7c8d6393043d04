use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tables that publish row-level change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    InterviewInvitations,
    InterviewSessions,
    InterviewTranscripts,
    InterviewReports,
}

impl ChangeTable {
    pub const ALL: [ChangeTable; 4] = [
        ChangeTable::InterviewInvitations,
        ChangeTable::InterviewSessions,
        ChangeTable::InterviewTranscripts,
        ChangeTable::InterviewReports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeTable::InterviewInvitations => "interview_invitations",
            ChangeTable::InterviewSessions => "interview_sessions",
            ChangeTable::InterviewTranscripts => "interview_transcripts",
            ChangeTable::InterviewReports => "interview_reports",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed row change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: ChangeTable,
    pub kind: ChangeKind,
    /// Owning company; rows without one are not delivered to company feeds
    pub company_id: Option<String>,
    pub record_id: String,
    pub committed_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(
        table: ChangeTable,
        kind: ChangeKind,
        company_id: Option<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            table,
            kind,
            company_id,
            record_id: record_id.into(),
            committed_at: Utc::now(),
        }
    }

    pub fn matches(&self, company_id: &str, tables: &[ChangeTable]) -> bool {
        self.company_id.as_deref() == Some(company_id) && tables.contains(&self.table)
    }
}

/// Read views that depend on the change feed, each with its fixed table set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedView {
    /// Invitation and session list
    InterviewManagement,
    /// Reports and transcripts
    Analytics,
    All,
}

impl FeedView {
    pub fn tables(&self) -> &'static [ChangeTable] {
        match self {
            FeedView::InterviewManagement => &[
                ChangeTable::InterviewInvitations,
                ChangeTable::InterviewSessions,
            ],
            FeedView::Analytics => &[
                ChangeTable::InterviewReports,
                ChangeTable::InterviewTranscripts,
            ],
            FeedView::All => &ChangeTable::ALL,
        }
    }
}
