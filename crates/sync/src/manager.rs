//! The synchronization manager: subscription registry, reconnect loop,
//! staleness heartbeat, conflict observation, and notification fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use rallypoint_core::conflict::{EntityVersion, Resolution};
use rallypoint_events::{tables, ChangeEvent};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::feed::ChangeFeed;
use crate::notify::{notification_for, NotificationSink};
use crate::subscription::{
    backoff_delay, ConnectionStatus, Subscription, SubscriptionId, WatchFilter,
};
use crate::tracker::{version_from_row, ConflictTracker};

/// What a subscriber's callback receives.
#[derive(Debug)]
pub enum SyncUpdate {
    /// A change inside the watch, with the conflict resolution applied to
    /// it, if any.
    Change {
        event: ChangeEvent,
        resolution: Option<Resolution>,
    },
    /// The subscription lost its connection and will retry after `delay`.
    Reconnecting { retry_count: u32, delay: Duration },
    /// The subscription was abandoned; no further updates will arrive.
    Failed(SyncError),
}

type OnChange = Arc<dyn Fn(SyncUpdate) + Send + Sync>;

struct Entry {
    sub: Subscription,
    on_change: OnChange,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: SyncConfig,
    feed: Arc<dyn ChangeFeed>,
    sink: Arc<dyn NotificationSink>,
    subs: RwLock<HashMap<SubscriptionId, Entry>>,
    tracker: Mutex<ConflictTracker>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns all live watches. Cheaply cloneable; lifetime is tied to the
/// service instance, with [`cleanup`](SyncManager::cleanup) as the
/// explicit teardown.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        sink: Arc<dyn NotificationSink>,
        config: SyncConfig,
    ) -> Self {
        let tracker = ConflictTracker::new(
            config.conflict_history_limit,
            config.optimistic_fields.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                feed,
                sink,
                subs: RwLock::new(HashMap::new()),
                tracker: Mutex::new(tracker),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Open a logical watch. The callback runs on the delivery task for
    /// every matching change until the handle is dropped via
    /// [`SubscriptionHandle::unsubscribe`] or the manager is cleaned up.
    pub async fn subscribe(
        &self,
        filter: WatchFilter,
        on_change: impl Fn(SyncUpdate) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let sub = Subscription::new(filter);
        let id = sub.id;

        let mut subs = self.inner.subs.write().await;
        subs.insert(
            id,
            Entry {
                sub,
                on_change: Arc::new(on_change),
                task: None,
            },
        );
        let task = tokio::spawn(Self::run_subscription(self.inner.clone(), id));
        if let Some(entry) = subs.get_mut(&id) {
            entry.task = Some(task);
        }
        drop(subs);

        tracing::debug!(%id, "Subscription registered");
        SubscriptionHandle {
            id,
            manager: self.clone(),
        }
    }

    /// Remove a watch and stop its delivery task.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(entry) = self.inner.subs.write().await.remove(&id) {
            if let Some(task) = entry.task {
                task.abort();
            }
            tracing::debug!(%id, "Subscription removed");
        }
    }

    /// Snapshot of a subscription's registry state.
    pub async fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.inner.subs.read().await.get(&id).map(|e| e.sub.clone())
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.subs.read().await.len()
    }

    // -----------------------------------------------------------------------
    // Connection loop
    // -----------------------------------------------------------------------

    /// Drive one subscription: connect (with timeout), pump events, and on
    /// any failure reconnect with exponential backoff until the retry
    /// budget is exhausted.
    async fn run_subscription(inner: Arc<Inner>, id: SubscriptionId) {
        loop {
            let (filter, on_change) = {
                let mut subs = inner.subs.write().await;
                let Some(entry) = subs.get_mut(&id) else { return };
                entry.sub.status = ConnectionStatus::Connecting;
                (entry.sub.filter, entry.on_change.clone())
            };

            match timeout(inner.config.connect_timeout, inner.feed.connect(&filter)).await {
                Ok(Ok(rx)) => {
                    {
                        let mut subs = inner.subs.write().await;
                        let Some(entry) = subs.get_mut(&id) else { return };
                        entry.sub.status = ConnectionStatus::Connected;
                        entry.sub.retry_count = 0;
                        entry.sub.last_activity = Utc::now();
                        entry.sub.last_error = None;
                    }
                    tracing::info!(%id, "Subscription connected");
                    Self::pump(&inner, id, rx, filter, &on_change).await;

                    let mut subs = inner.subs.write().await;
                    match subs.get_mut(&id) {
                        Some(entry) => entry.sub.status = ConnectionStatus::Disconnected,
                        None => return,
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(%id, error = %e, "Change feed connection failed");
                    let mut subs = inner.subs.write().await;
                    let Some(entry) = subs.get_mut(&id) else { return };
                    entry.sub.last_error = Some(SyncError::SubscriptionError {
                        id,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        %id,
                        timeout_secs = inner.config.connect_timeout.as_secs(),
                        "Subscription timed out while connecting"
                    );
                    let mut subs = inner.subs.write().await;
                    let Some(entry) = subs.get_mut(&id) else { return };
                    entry.sub.last_error = Some(SyncError::SubscriptionTimeout { id });
                }
            }

            // Reconnect or give up.
            let retry_count = {
                let mut subs = inner.subs.write().await;
                let Some(entry) = subs.get_mut(&id) else { return };
                entry.sub.retry_count += 1;
                entry.sub.retry_count
            };

            if retry_count > inner.config.max_retries {
                let mut subs = inner.subs.write().await;
                if let Some(entry) = subs.get_mut(&id) {
                    entry.sub.status = ConnectionStatus::Error;
                }
                drop(subs);
                tracing::error!(%id, retries = retry_count - 1, "Subscription abandoned");
                on_change(SyncUpdate::Failed(SyncError::RetriesExhausted {
                    id,
                    retries: retry_count - 1,
                }));
                return;
            }

            let delay = backoff_delay(retry_count - 1);
            tracing::info!(%id, retry_count, delay_ms = delay.as_millis() as u64, "Reconnecting");
            on_change(SyncUpdate::Reconnecting { retry_count, delay });
            tokio::time::sleep(delay).await;
        }
    }

    /// Deliver events from an established stream until it closes.
    async fn pump(
        inner: &Arc<Inner>,
        id: SubscriptionId,
        mut rx: broadcast::Receiver<ChangeEvent>,
        filter: WatchFilter,
        on_change: &OnChange,
    ) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    {
                        let mut subs = inner.subs.write().await;
                        let Some(entry) = subs.get_mut(&id) else { return };
                        entry.sub.last_activity = Utc::now();
                    }
                    if !filter.matches(&event) {
                        continue;
                    }
                    let resolution = Self::observe(inner, &event).await;
                    on_change(SyncUpdate::Change { event, resolution });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Dropped messages are recoverable: the next delivered
                    // version carries the authoritative state.
                    tracing::warn!(%id, skipped, "Subscription lagged behind the change feed");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!(%id, "Change feed closed");
                    return;
                }
            }
        }
    }

    /// Run an incoming session version through conflict detection.
    async fn observe(inner: &Arc<Inner>, event: &ChangeEvent) -> Option<Resolution> {
        if event.table != tables::SESSIONS {
            return None;
        }
        let version = version_from_row(event.new_row.as_ref()?)?;
        let resolution = inner.tracker.lock().await.observe(version);
        if let Some(r) = &resolution {
            tracing::info!(
                entity_id = r.entity_id,
                kind = ?r.kind,
                winner = ?r.winner,
                "Conflict resolved"
            );
        }
        resolution
    }

    /// Record a tentative local mutation for later reconciliation.
    pub async fn apply_optimistic(&self, version: EntityVersion, fields: Vec<String>) {
        self.inner.tracker.lock().await.apply_optimistic(version, fields);
    }

    /// Recorded conflict resolutions, oldest first (bounded).
    pub async fn conflict_history(&self) -> Vec<Resolution> {
        self.inner.tracker.lock().await.history().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    /// Start the heartbeat staleness scan and the notification fan-out.
    pub async fn start(&self) {
        let mut background = self.inner.background.lock().await;

        let manager = self.clone();
        background.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.config.heartbeat_interval);
            loop {
                interval.tick().await;
                manager.scan_stale_once().await;
            }
        }));

        let inner = self.inner.clone();
        background.push(tokio::spawn(async move {
            Self::run_notifier(inner).await;
        }));
    }

    /// One staleness pass: any connected subscription without activity for
    /// longer than the threshold is treated as disconnected and its loop
    /// is restarted, even if the transport still believes it is open.
    pub async fn scan_stale_once(&self) {
        let now = Utc::now();
        let mut subs = self.inner.subs.write().await;
        let stale: Vec<SubscriptionId> = subs
            .iter()
            .filter(|(_, e)| {
                e.sub.status == ConnectionStatus::Connected
                    && now
                        .signed_duration_since(e.sub.last_activity)
                        .to_std()
                        .map(|idle| idle > self.inner.config.stale_after)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            tracing::warn!(%id, "Subscription stale, scheduling reconnect");
            if let Some(entry) = subs.get_mut(&id) {
                entry.sub.status = ConnectionStatus::Disconnected;
                if let Some(task) = entry.task.take() {
                    task.abort();
                }
                entry.task = Some(tokio::spawn(Self::run_subscription(
                    self.inner.clone(),
                    id,
                )));
            }
        }
    }

    /// Single feed-wide listener that turns status changes into user
    /// notifications. Deliveries are spawned, never awaited here. The
    /// notifier outlives individual connections: a failed or closed feed
    /// reconnects with the same backoff schedule as subscriptions.
    async fn run_notifier(inner: Arc<Inner>) {
        let mut retry_count: u32 = 0;
        loop {
            let connect = inner.feed.connect(&WatchFilter::AllSessions);
            let mut rx = match timeout(inner.config.connect_timeout, connect).await {
                Ok(Ok(rx)) => {
                    retry_count = 0;
                    rx
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Notifier could not connect to the change feed");
                    let delay = backoff_delay(retry_count);
                    retry_count = retry_count.saturating_add(1);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(_) => {
                    tracing::warn!("Notifier timed out while connecting to the change feed");
                    let delay = backoff_delay(retry_count);
                    retry_count = retry_count.saturating_add(1);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(notification) = notification_for(&event) else {
                            continue;
                        };
                        for user_id in notification.recipients {
                            let sink = inner.sink.clone();
                            let message = notification.message.clone();
                            tokio::spawn(async move {
                                sink.notify(user_id, &message).await;
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Notifier feed closed, reconnecting");
                        break;
                    }
                }
            }
        }
    }

    /// Tear down every subscription and background task.
    pub async fn cleanup(&self) {
        let mut subs = self.inner.subs.write().await;
        let count = subs.len();
        for (_, entry) in subs.drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        drop(subs);

        for task in self.inner.background.lock().await.drain(..) {
            task.abort();
        }
        self.inner.tracker.lock().await.clear();
        tracing::info!(count, "Sync manager cleaned up");
    }

    #[cfg(test)]
    async fn force_last_activity(&self, id: SubscriptionId, ts: rallypoint_core::types::Timestamp) {
        if let Some(entry) = self.inner.subs.write().await.get_mut(&id) {
            entry.sub.last_activity = ts;
        }
    }
}

/// Caller-held handle to one watch.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    manager: SyncManager,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn status(&self) -> Option<ConnectionStatus> {
        self.manager.subscription(self.id).await.map(|s| s.status)
    }

    pub async fn unsubscribe(self) {
        self.manager.unsubscribe(self.id).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
