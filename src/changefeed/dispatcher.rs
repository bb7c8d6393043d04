use futures::stream::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::bus::{ChangeSource, NotificationStream};
use super::notification::ChangeTable;
use crate::config::ChangeFeedConfig;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("a change feed needs at least one table")]
    NoTables,

    #[error("no active change feed mount {mount_id} for company {company_id}")]
    UnknownMount { company_id: String, mount_id: String },

    #[error("change source unavailable: {0}")]
    Source(String),
}

/// Timing policy for a subscription
#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub debounce: Duration,
    pub stale_after: Duration,
}

impl From<&ChangeFeedConfig> for FeedSettings {
    fn from(config: &ChangeFeedConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            stale_after: Duration::from_millis(config.stale_after_ms),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self::from(&ChangeFeedConfig::default())
    }
}

/// One consuming view instance within a company
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountKey {
    pub company_id: String,
    pub mount_id: String,
}

impl MountKey {
    pub fn new(company_id: impl Into<String>, mount_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            mount_id: mount_id.into(),
        }
    }
}

/// Foreground state reported by the consuming view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Hidden,
    Visible,
    Focus,
}

/// Instruction to reload the dependent view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Refresh {
    /// A burst of row changes settled
    Changes { notifications: usize },
    /// The view came back after being hidden longer than the stale threshold
    Stale { away_ms: u64 },
}

struct MountEntry {
    generation: u64,
    control: mpsc::UnboundedSender<Visibility>,
    task: AbortHandle,
}

type MountRegistry = Arc<Mutex<HashMap<MountKey, MountEntry>>>;

/// Turns row-level change notifications into debounced refresh triggers,
/// one subscription per (company, mount).
pub struct ChangeFeedDispatcher {
    source: Arc<dyn ChangeSource>,
    settings: FeedSettings,
    mounts: MountRegistry,
    generation: AtomicU64,
}

impl ChangeFeedDispatcher {
    pub fn new(source: Arc<dyn ChangeSource>, settings: FeedSettings) -> Self {
        Self {
            source,
            settings,
            mounts: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Subscribe a mount to `tables`. An existing subscription for the same
    /// key is torn down first.
    pub async fn subscribe(
        &self,
        key: MountKey,
        tables: &[ChangeTable],
    ) -> Result<FeedSubscription, FeedError> {
        if tables.is_empty() {
            return Err(FeedError::NoTables);
        }

        let notifications = self
            .source
            .subscribe(&key.company_id, tables)
            .await
            .map_err(|e| FeedError::Source(format!("{:#}", e)))?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::channel(16);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);

        let task = tokio::spawn(run_feed(
            notifications,
            control_rx,
            refresh_tx,
            self.settings,
            key.clone(),
        ));

        let previous = self.mounts.lock().insert(
            key.clone(),
            MountEntry {
                generation,
                control: control_tx.clone(),
                task: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            info!(
                "Replacing change feed for company {} mount {}",
                key.company_id, key.mount_id
            );
            previous.task.abort();
        }

        info!(
            "Change feed subscribed: company={} mount={} tables={}",
            key.company_id,
            key.mount_id,
            tables.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
        );

        Ok(FeedSubscription {
            key,
            generation,
            control: control_tx,
            refreshes: refresh_rx,
            task,
            mounts: Arc::clone(&self.mounts),
        })
    }

    /// Forward a visibility transition to an active mount
    pub fn signal(&self, key: &MountKey, visibility: Visibility) -> Result<(), FeedError> {
        let mounts = self.mounts.lock();
        let entry = mounts.get(key).ok_or_else(|| FeedError::UnknownMount {
            company_id: key.company_id.clone(),
            mount_id: key.mount_id.clone(),
        })?;

        entry
            .control
            .send(visibility)
            .map_err(|_| FeedError::UnknownMount {
                company_id: key.company_id.clone(),
                mount_id: key.mount_id.clone(),
            })
    }

    pub fn active_mounts(&self) -> usize {
        self.mounts.lock().len()
    }
}

/// A live change-feed subscription. Dropping it cancels the debounce timer
/// and releases the upstream subscription.
pub struct FeedSubscription {
    key: MountKey,
    generation: u64,
    control: mpsc::UnboundedSender<Visibility>,
    refreshes: mpsc::Receiver<Refresh>,
    task: JoinHandle<()>,
    mounts: MountRegistry,
}

impl FeedSubscription {
    /// Wait for the next refresh; `None` once the subscription is closed or
    /// replaced
    pub async fn next_refresh(&mut self) -> Option<Refresh> {
        self.refreshes.recv().await
    }

    /// `false` when the feed task has already stopped
    pub fn set_visibility(&self, visibility: Visibility) -> bool {
        if self.control.send(visibility).is_err() {
            debug!(
                "Change feed for company {} mount {} already stopped, dropping {:?}",
                self.key.company_id, self.key.mount_id, visibility
            );
            return false;
        }
        true
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();

        let mut mounts = self.mounts.lock();
        if mounts
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            mounts.remove(&self.key);
        }

        debug!(
            "Change feed torn down: company={} mount={}",
            self.key.company_id, self.key.mount_id
        );
    }
}

/// Returns false once the consumer has gone away
fn emit(refreshes: &mpsc::Sender<Refresh>, refresh: Refresh) -> bool {
    match refreshes.try_send(refresh) {
        Ok(()) => true,
        // A refresh is already queued; another one adds nothing
        Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn run_feed(
    mut notifications: NotificationStream,
    mut control: mpsc::UnboundedReceiver<Visibility>,
    refreshes: mpsc::Sender<Refresh>,
    settings: FeedSettings,
    key: MountKey,
) {
    let mut deadline: Option<Instant> = None;
    let mut pending = 0usize;
    let mut hidden_since: Option<Instant> = None;

    loop {
        let timer = sleep_until(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            next = notifications.next() => match next {
                Some(notification) => {
                    debug!(
                        "{} {} changed for company {}",
                        notification.table.as_str(),
                        notification.record_id,
                        key.company_id
                    );
                    pending += 1;
                    deadline = Some(Instant::now() + settings.debounce);
                }
                None => {
                    info!("Change source closed for company {}", key.company_id);
                    if pending > 0 {
                        emit(&refreshes, Refresh::Changes { notifications: pending });
                    }
                    break;
                }
            },
            signal = control.recv() => match signal {
                Some(Visibility::Hidden) => {
                    hidden_since.get_or_insert_with(Instant::now);
                }
                Some(Visibility::Visible) | Some(Visibility::Focus) => {
                    if let Some(since) = hidden_since.take() {
                        let away = since.elapsed();
                        if away > settings.stale_after {
                            // The stale reload covers anything still pending
                            deadline = None;
                            pending = 0;
                            let away_ms = away.as_millis() as u64;
                            if !emit(&refreshes, Refresh::Stale { away_ms }) {
                                break;
                            }
                        }
                    }
                }
                None => break,
            },
            () = timer, if deadline.is_some() => {
                deadline = None;
                let count = std::mem::take(&mut pending);
                if !emit(&refreshes, Refresh::Changes { notifications: count }) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::bus::{ChangeSink, LocalChangeBus};
    use crate::changefeed::notification::{ChangeKind, ChangeNotification, FeedView};

    fn setup() -> (LocalChangeBus, ChangeFeedDispatcher) {
        let bus = LocalChangeBus::new();
        let dispatcher = ChangeFeedDispatcher::new(Arc::new(bus.clone()), FeedSettings::default());
        (bus, dispatcher)
    }

    async fn invitation_changed(bus: &LocalChangeBus, company: &str) {
        bus.publish(&ChangeNotification::new(
            ChangeTable::InterviewInvitations,
            ChangeKind::Update,
            Some(company.to_string()),
            "inv-1",
        ))
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_refresh() {
        let (bus, dispatcher) = setup();
        let mut sub = dispatcher
            .subscribe(MountKey::new("acme", "m1"), FeedView::All.tables())
            .await
            .unwrap();

        for _ in 0..5 {
            invitation_changed(&bus, "acme").await;
        }

        assert_eq!(
            sub.next_refresh().await,
            Some(Refresh::Changes { notifications: 5 })
        );
        let more = tokio::time::timeout(Duration::from_secs(5), sub.next_refresh()).await;
        assert!(more.is_err(), "burst must produce exactly one refresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_notifications_refresh_each_time() {
        let (bus, dispatcher) = setup();
        let mut sub = dispatcher
            .subscribe(MountKey::new("acme", "m1"), FeedView::All.tables())
            .await
            .unwrap();

        for _ in 0..3 {
            invitation_changed(&bus, "acme").await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        for _ in 0..3 {
            assert_eq!(
                sub.next_refresh().await,
                Some(Refresh::Changes { notifications: 1 })
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_company_does_not_refresh() {
        let (bus, dispatcher) = setup();
        let mut sub = dispatcher
            .subscribe(MountKey::new("acme", "m1"), FeedView::All.tables())
            .await
            .unwrap();

        invitation_changed(&bus, "globex").await;

        let refresh = tokio::time::timeout(Duration::from_secs(2), sub.next_refresh()).await;
        assert!(refresh.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_after_long_absence_refreshes() {
        let (_bus, dispatcher) = setup();
        let key = MountKey::new("acme", "m1");
        let mut sub = dispatcher.subscribe(key.clone(), FeedView::All.tables()).await.unwrap();

        sub.set_visibility(Visibility::Hidden);
        tokio::time::sleep(Duration::from_secs(20)).await;
        dispatcher.signal(&key, Visibility::Visible).unwrap();

        match sub.next_refresh().await {
            Some(Refresh::Stale { away_ms }) => assert!(away_ms >= 20_000),
            other => panic!("expected stale refresh, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_absence_does_not_refresh() {
        let (_bus, dispatcher) = setup();
        let mut sub = dispatcher
            .subscribe(MountKey::new("acme", "m1"), FeedView::All.tables())
            .await
            .unwrap();

        sub.set_visibility(Visibility::Hidden);
        tokio::time::sleep(Duration::from_secs(5)).await;
        sub.set_visibility(Visibility::Focus);
        // Focus without a preceding hide is not a return from background
        sub.set_visibility(Visibility::Focus);

        let refresh = tokio::time::timeout(Duration::from_secs(2), sub.next_refresh()).await;
        assert!(refresh.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_after_task_stopped_is_dropped() {
        let (_bus, dispatcher) = setup();
        let mut sub = dispatcher
            .subscribe(MountKey::new("acme", "m1"), FeedView::All.tables())
            .await
            .unwrap();
        assert!(sub.set_visibility(Visibility::Hidden));

        sub.task.abort();
        let _ = (&mut sub.task).await;

        assert!(!sub.set_visibility(Visibility::Visible));
        assert_eq!(sub.next_refresh().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down_mount() {
        let (bus, dispatcher) = setup();
        let key = MountKey::new("acme", "m1");
        let sub = dispatcher.subscribe(key.clone(), FeedView::All.tables()).await.unwrap();
        assert_eq!(dispatcher.active_mounts(), 1);

        invitation_changed(&bus, "acme").await;
        drop(sub);

        assert_eq!(dispatcher.active_mounts(), 0);
        assert!(matches!(
            dispatcher.signal(&key, Visibility::Visible),
            Err(FeedError::UnknownMount { .. })
        ));

        // Aborted task releases its upstream receiver
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribing_same_mount_replaces_previous() {
        let (_bus, dispatcher) = setup();
        let key = MountKey::new("acme", "m1");

        let mut first = dispatcher.subscribe(key.clone(), FeedView::All.tables()).await.unwrap();
        let second = dispatcher.subscribe(key.clone(), FeedView::All.tables()).await.unwrap();

        assert_eq!(first.next_refresh().await, None);
        drop(first);
        // The replaced subscription must not unregister its successor
        assert_eq!(dispatcher.active_mounts(), 1);
        drop(second);
        assert_eq!(dispatcher.active_mounts(), 0);
    }

    #[tokio::test]
    async fn test_empty_table_set_rejected() {
        let (_bus, dispatcher) = setup();
        assert!(matches!(
            dispatcher.subscribe(MountKey::new("acme", "m1"), &[]).await,
            Err(FeedError::NoTables)
        ));
    }
}
