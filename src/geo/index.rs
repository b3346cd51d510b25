// GeoIndex: "which sparks are within R km of P", once or as a live feed.
//
// A query is planned as geohash prefix ranges (see geohash::query_ranges),
// each range is scanned in the store with expired sparks filtered out, and
// the union is post-filtered by exact haversine distance. Cell boxes are
// larger than the circle, so the post-filter is what keeps corner sparks out.
//
// Live subscriptions run in a background task fed by two sources:
//   - the in-process SparkFeed, published by the service on insert/warm, for
//     immediate updates
//   - a refresh tick that re-runs the query and diffs it against the current
//     view, which picks up writes from other processes and drops sparks that
//     have expired since the last look
// Dropping or unsubscribing aborts the task and closes the channel.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::distance::haversine_km;
use super::geohash;
use crate::clock::Clock;
use crate::db::SparkStore;
use crate::error::Result;
use crate::spark::{Coordinates, Spark};

/// Discovery radius used by the app.
pub const DEFAULT_RADIUS_KM: f64 = 0.5;

/// How often a live subscription re-queries the store.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);
const FEED_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 64;

/// A change to the sparks collection, published after it is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum SparkEvent {
    Inserted(Spark),
    Warmed(Spark),
}

/// In-process fan-out of spark changes to every open subscription.
#[derive(Clone)]
pub struct SparkFeed {
    sender: broadcast::Sender<SparkEvent>,
}

impl SparkFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. With no subscribers the event is dropped.
    pub fn publish(&self, event: SparkEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SparkEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions still listening.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SparkFeed {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}

/// What a live subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum NearbyUpdate {
    /// The full result set at subscription time, nearest first.
    Snapshot(Vec<Spark>),
    Added(Spark),
    /// A spark already in view changed (its warm count went up).
    Modified(Spark),
    /// A spark left the view, by expiring or by being deleted.
    Removed(String),
}

pub struct GeoIndex {
    store: Arc<dyn SparkStore>,
    clock: Arc<dyn Clock>,
    feed: SparkFeed,
    refresh_interval: Duration,
}

impl GeoIndex {
    pub fn new(store: Arc<dyn SparkStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            feed: SparkFeed::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval.max(MIN_REFRESH_INTERVAL);
        self
    }

    pub fn feed(&self) -> &SparkFeed {
        &self.feed
    }

    pub fn publish(&self, event: SparkEvent) {
        self.feed.publish(event);
    }

    /// Active sparks within `radius_km` of `center`, nearest first.
    pub async fn nearby(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Spark>> {
        query_nearby(self.store.as_ref(), center, radius_km, self.clock.now()).await
    }

    /// Open a live view of the sparks within `radius_km` of `center`.
    ///
    /// The first item is always a `Snapshot`.
    pub async fn subscribe_nearby(
        &self,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<NearbySubscription> {
        // Subscribe before the initial query so nothing committed in between is missed.
        let events = self.feed.subscribe();
        let initial = self.nearby(center, radius_km).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut view = NearbyView::new(center, radius_km);
        view.reset(&initial);
        // The channel is fresh and has room, so this cannot fail.
        let _ = tx.try_send(NearbyUpdate::Snapshot(initial));

        info!(
            lat = center.latitude,
            lng = center.longitude,
            radius_km,
            in_view = view.len(),
            "Nearby subscription opened"
        );

        let worker = SubscriptionWorker {
            store: self.store.clone(),
            clock: self.clock.clone(),
            view,
            refresh_interval: self.refresh_interval,
        };
        let task = tokio::spawn(worker.run(events, tx));

        Ok(NearbySubscription { updates: rx, task })
    }
}

/// Query planning plus the mandatory exact-distance filter.
async fn query_nearby(
    store: &dyn SparkStore,
    center: Coordinates,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Result<Vec<Spark>> {
    let ranges = geohash::query_ranges(center, radius_km);
    debug!(cells = ranges.len(), radius_km, "Planned nearby query");

    let mut seen = HashSet::new();
    let mut found: Vec<(f64, Spark)> = Vec::new();
    for range in &ranges {
        for spark in store.query_range(range, now).await? {
            if !seen.insert(spark.id.clone()) {
                continue;
            }
            let distance = haversine_km(center, spark.coordinates);
            if distance <= radius_km && !spark.is_expired(now) {
                found.push((distance, spark));
            }
        }
    }

    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(found.into_iter().map(|(_, spark)| spark).collect())
}

/// The set of sparks a subscription currently shows.
#[derive(Debug)]
struct NearbyView {
    center: Coordinates,
    radius_km: f64,
    sparks: HashMap<String, Spark>,
}

impl NearbyView {
    fn new(center: Coordinates, radius_km: f64) -> Self {
        Self {
            center,
            radius_km,
            sparks: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.sparks.len()
    }

    fn reset(&mut self, sparks: &[Spark]) {
        self.sparks = sparks.iter().map(|s| (s.id.clone(), s.clone())).collect();
    }

    fn matches(&self, spark: &Spark, now: DateTime<Utc>) -> bool {
        !spark.is_expired(now) && haversine_km(self.center, spark.coordinates) <= self.radius_km
    }

    /// Fold one spark into the view and report what changed, if anything.
    ///
    /// Only the warm count can change on a stored spark, and it never goes
    /// down, so a lower count is a stale read and is ignored.
    fn upsert(&mut self, spark: Spark, now: DateTime<Utc>) -> Option<NearbyUpdate> {
        if !self.matches(&spark, now) {
            return self
                .sparks
                .remove(&spark.id)
                .map(|old| NearbyUpdate::Removed(old.id));
        }
        match self.sparks.get(&spark.id).map(|s| s.warmed_count) {
            None => {
                self.sparks.insert(spark.id.clone(), spark.clone());
                Some(NearbyUpdate::Added(spark))
            }
            Some(current) if spark.warmed_count > current => {
                self.sparks.insert(spark.id.clone(), spark.clone());
                Some(NearbyUpdate::Modified(spark))
            }
            Some(_) => None,
        }
    }

    fn apply_event(&mut self, event: SparkEvent, now: DateTime<Utc>) -> Option<NearbyUpdate> {
        match event {
            SparkEvent::Inserted(spark) | SparkEvent::Warmed(spark) => self.upsert(spark, now),
        }
    }

    /// Replace the view with a fresh query result, returning the differences.
    /// Removals come first, then additions and modifications in id order.
    fn diff(&mut self, mut fresh: Vec<Spark>, now: DateTime<Utc>) -> Vec<NearbyUpdate> {
        let mut gone: Vec<String> = {
            let fresh_ids: HashSet<&str> = fresh.iter().map(|s| s.id.as_str()).collect();
            self.sparks
                .keys()
                .filter(|id| !fresh_ids.contains(id.as_str()))
                .cloned()
                .collect()
        };
        gone.sort();

        let mut updates: Vec<NearbyUpdate> = gone
            .into_iter()
            .filter_map(|id| self.sparks.remove(&id).map(|_| NearbyUpdate::Removed(id)))
            .collect();

        fresh.sort_by(|a, b| a.id.cmp(&b.id));
        updates.extend(fresh.into_iter().filter_map(|s| self.upsert(s, now)));
        updates
    }

    /// Drop sparks that have expired while in view.
    fn expire(&mut self, now: DateTime<Utc>) -> Vec<NearbyUpdate> {
        let mut expired: Vec<String> = self
            .sparks
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();
        expired.sort();
        for id in &expired {
            self.sparks.remove(id);
        }
        expired.into_iter().map(NearbyUpdate::Removed).collect()
    }
}

struct SubscriptionWorker {
    store: Arc<dyn SparkStore>,
    clock: Arc<dyn Clock>,
    view: NearbyView,
    refresh_interval: Duration,
}

impl SubscriptionWorker {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<SparkEvent>,
        tx: mpsc::Sender<NearbyUpdate>,
    ) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the snapshot already covers it.
        ticker.tick().await;

        let mut feed_open = true;
        loop {
            let updates = tokio::select! {
                _ = tx.closed() => break,
                received = events.recv(), if feed_open => match received {
                    Ok(event) => {
                        let now = self.clock.now();
                        self.view.apply_event(event, now).into_iter().collect()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Nearby subscription lagged, refreshing");
                        self.refresh().await
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Spark feed closed, continuing on refresh ticks");
                        feed_open = false;
                        Vec::new()
                    }
                },
                _ = ticker.tick() => self.refresh().await,
            };

            for update in updates {
                if tx.send(update).await.is_err() {
                    debug!("Nearby subscriber went away");
                    return;
                }
            }
        }
        debug!("Nearby subscription closed");
    }

    /// Re-run the query and diff it against the view. On store errors the
    /// view is kept, but sparks that have expired are still removed.
    async fn refresh(&mut self) -> Vec<NearbyUpdate> {
        let now = self.clock.now();
        match query_nearby(
            self.store.as_ref(),
            self.view.center,
            self.view.radius_km,
            now,
        )
        .await
        {
            Ok(fresh) => self.view.diff(fresh, now),
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Nearby refresh failed");
                self.view.expire(now)
            }
        }
    }
}

/// A live nearby query. Yields `NearbyUpdate`s until dropped.
///
/// Implements `Stream`, or call `recv` directly.
pub struct NearbySubscription {
    updates: mpsc::Receiver<NearbyUpdate>,
    task: JoinHandle<()>,
}

impl NearbySubscription {
    /// Wait for the next update. Returns None once the subscription has stopped.
    pub async fn recv(&mut self) -> Option<NearbyUpdate> {
        self.updates.recv().await
    }

    /// Stop the subscription. No updates are delivered afterwards.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for NearbySubscription {
    fn drop(&mut self) {
        self.task.abort();
        self.updates.close();
    }
}

impl Stream for NearbySubscription {
    type Item = NearbyUpdate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().updates.poll_recv(cx)
    }
}
