use serde::{Deserialize, Serialize};

use crate::changefeed::{ChangeKind, ChangeNotification, ChangeTable};

/// Change notification as published on NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeEventMessage {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    pub company_id: Option<String>,
    pub record_id: String,
    pub timestamp: String, // RFC3339 timestamp
}

impl From<&ChangeNotification> for ChangeEventMessage {
    fn from(n: &ChangeNotification) -> Self {
        Self {
            table: n.table.as_str().to_string(),
            event_type: n.kind,
            company_id: n.company_id.clone(),
            record_id: n.record_id.clone(),
            timestamp: n.committed_at.to_rfc3339(),
        }
    }
}

impl ChangeEventMessage {
    /// `None` for tables this service does not know about
    pub fn into_notification(self) -> Option<ChangeNotification> {
        let table = ChangeTable::parse(&self.table)?;
        let committed_at = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        Some(ChangeNotification {
            table,
            kind: self.event_type,
            company_id: self.company_id,
            record_id: self.record_id,
            committed_at,
        })
    }
}
