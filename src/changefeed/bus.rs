use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::notification::{ChangeKind, ChangeNotification, ChangeTable};

pub type NotificationStream = BoxStream<'static, ChangeNotification>;

/// Where the store announces committed row changes
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()>;
}

/// Where change-feed consumers subscribe
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Notifications for `company_id` on any of `tables`
    async fn subscribe(
        &self,
        company_id: &str,
        tables: &[ChangeTable],
    ) -> Result<NotificationStream>;
}

/// In-process change bus backed by a tokio broadcast channel
#[derive(Clone)]
pub struct LocalChangeBus {
    tx: broadcast::Sender<ChangeNotification>,
}

impl LocalChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeSink for LocalChangeBus {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()> {
        // Err only means nobody is listening
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for LocalChangeBus {
    async fn subscribe(
        &self,
        company_id: &str,
        tables: &[ChangeTable],
    ) -> Result<NotificationStream> {
        let state = (self.tx.subscribe(), company_id.to_string(), tables.to_vec());

        let stream = futures::stream::unfold(state, |(mut rx, company, tables)| async move {
            loop {
                match rx.recv().await {
                    Ok(n) if n.matches(&company, &tables) => {
                        return Some((n, (rx, company, tables)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        // Missed rows are unknown, so force a refresh
                        warn!(
                            "Change feed for {} lagged, {} notifications dropped",
                            company, missed
                        );
                        let table = tables
                            .first()
                            .copied()
                            .unwrap_or(ChangeTable::InterviewInvitations);
                        let synthetic = ChangeNotification::new(
                            table,
                            ChangeKind::Update,
                            Some(company.clone()),
                            "*",
                        );
                        return Some((synthetic, (rx, company, tables)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
