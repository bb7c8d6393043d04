//! Change-feed driven refresh of dependent read views
//!
//! The store publishes a [`ChangeNotification`] for every committed row
//! change. Consumers subscribe per (company, mount); bursts are collapsed by
//! a debounce window and a view returning from the background after the
//! stale threshold is refreshed once to cover missed notifications.

mod bus;
mod dispatcher;
mod notification;

pub use bus::{ChangeSink, ChangeSource, LocalChangeBus, NotificationStream};
pub use dispatcher::{
    ChangeFeedDispatcher, FeedError, FeedSettings, FeedSubscription, MountKey, Refresh,
    Visibility,
};
pub use notification::{ChangeKind, ChangeNotification, ChangeTable, FeedView};
