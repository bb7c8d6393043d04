use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::messages::ChangeEventMessage;
use crate::changefeed::{
    ChangeNotification, ChangeSink, ChangeSource, ChangeTable, NotificationStream,
};

/// Change notifications over NATS.
///
/// Subjects are `<prefix>.<table>.<company_id>`; rows without a company go
/// to `<prefix>.<table>._`.
pub struct NatsChangeBus {
    client: Client,
    subject_prefix: String,
}

impl NatsChangeBus {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        })
    }

    pub fn subject(&self, table: ChangeTable, company_id: Option<&str>) -> String {
        change_subject(&self.subject_prefix, table, company_id)
    }
}

/// Subject a change on `table` for `company_id` is published on
pub fn change_subject(prefix: &str, table: ChangeTable, company_id: Option<&str>) -> String {
    let company = company_id.map(subject_token).unwrap_or_else(|| "_".to_string());
    format!("{}.{}.{}", prefix, table.as_str(), company)
}

/// Subject tokens cannot contain separators or wildcards
fn subject_token(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}

#[async_trait]
impl ChangeSink for NatsChangeBus {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()> {
        let subject = self.subject(notification.table, notification.company_id.as_deref());
        let payload = serde_json::to_vec(&ChangeEventMessage::from(notification))?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish change notification")?;

        Ok(())
    }
}

#[async_trait]
impl ChangeSource for NatsChangeBus {
    async fn subscribe(
        &self,
        company_id: &str,
        tables: &[ChangeTable],
    ) -> Result<NotificationStream> {
        let mut streams = Vec::with_capacity(tables.len());

        for table in tables {
            let subject = self.subject(*table, Some(company_id));
            let subscriber = self
                .client
                .subscribe(subject.clone())
                .await
                .with_context(|| format!("Failed to subscribe to {}", subject))?;

            info!("Subscribed to {}", subject);

            let company = company_id.to_string();
            let tables = tables.to_vec();
            let notifications = subscriber.filter_map(move |msg| {
                let company = company.clone();
                let tables = tables.clone();
                async move {
                    match serde_json::from_slice::<ChangeEventMessage>(&msg.payload) {
                        Ok(event) => event
                            .into_notification()
                            .filter(|n| n.matches(&company, &tables)),
                        Err(e) => {
                            warn!("Failed to parse change notification: {}", e);
                            None
                        }
                    }
                }
            });
            streams.push(notifications.boxed());
        }

        Ok(stream::select_all(streams).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_layout() {
        assert_eq!(
            change_subject("db.changes", ChangeTable::InterviewReports, Some("acme")),
            "db.changes.interview_reports.acme"
        );
        assert_eq!(
            change_subject("db.changes", ChangeTable::InterviewSessions, None),
            "db.changes.interview_sessions._"
        );
    }

    #[test]
    fn test_company_ids_cannot_inject_wildcards() {
        assert_eq!(
            change_subject("db", ChangeTable::InterviewInvitations, Some("a.b>*")),
            "db.interview_invitations.a_b__"
        );
    }
}
