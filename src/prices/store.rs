//! Thread-safe price and item cache.
//!
//! Both maps live behind `RwLock<Arc<HashMap>>`. Readers clone the `Arc`
//! (or copy a single record) and release the lock immediately, so they
//! always see one complete generation of data. Writers build the next
//! generation off-lock and swap it in. A failed refresh leaves the
//! current generation in place.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SnapshotProvider;
use crate::types::{ItemInfo, ItemMap, PriceMap, PriceSnapshot, VolumeMap};

pub struct PriceStore {
    provider: Arc<dyn SnapshotProvider>,
    prices: RwLock<Arc<PriceMap>>,
    items: RwLock<Arc<ItemMap>>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl PriceStore {
    pub fn new(provider: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            provider,
            prices: RwLock::new(Arc::new(PriceMap::new())),
            items: RwLock::new(Arc::new(ItemMap::new())),
            last_refreshed: RwLock::new(None),
        }
    }

    // -- Reads -----------------------------------------------------------

    pub fn get_price(&self, item_id: u32) -> Option<PriceSnapshot> {
        self.prices.read().get(&item_id).copied()
    }

    pub fn get_item_info(&self, item_id: u32) -> Option<ItemInfo> {
        self.items.read().get(&item_id).cloned()
    }

    pub fn item_name(&self, item_id: u32) -> Option<String> {
        self.items.read().get(&item_id).map(|i| i.name.clone())
    }

    /// Current price generation.
    pub fn prices(&self) -> Arc<PriceMap> {
        self.prices.read().clone()
    }

    /// Current catalog generation.
    pub fn items(&self) -> Arc<ItemMap> {
        self.items.read().clone()
    }

    pub fn price_count(&self) -> usize {
        self.prices.read().len()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    /// Time of the last successful price swap.
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read()
    }

    // -- Writes ----------------------------------------------------------

    /// Publish a new price generation.
    pub fn replace_prices(&self, prices: PriceMap) {
        *self.prices.write() = Arc::new(prices);
        *self.last_refreshed.write() = Some(Utc::now());
    }

    /// Publish a new catalog generation.
    pub fn replace_catalog(&self, items: ItemMap) {
        *self.items.write() = Arc::new(items);
    }

    /// Fetch a fresh price set (plus volumes) and swap it in.
    ///
    /// Volumes are merged into the new generation before it is published.
    /// On provider failure the current generation is kept and the error
    /// is returned for the caller to report. A volume failure alone does
    /// not block the price swap.
    pub async fn refresh_prices(&self) -> Result<usize> {
        let mut prices = self.provider.fetch_prices().await?;

        let volumes = match self.provider.fetch_volumes().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Volume fetch failed, publishing prices without volumes");
                VolumeMap::new()
            }
        };
        let merged = apply_volumes(&mut prices, &volumes);

        let count = prices.len();
        self.replace_prices(prices);
        info!(items = count, volumes = merged, "Prices refreshed");
        Ok(count)
    }

    /// Fetch and swap in the item catalog. An empty catalog is treated as
    /// a failed fetch.
    pub async fn refresh_item_catalog(&self) -> Result<usize> {
        let items = self.provider.fetch_catalog().await?;
        if items.is_empty() {
            return Err(anyhow!("provider returned an empty item catalog"));
        }
        let count = items.len();
        self.replace_catalog(items);
        info!(items = count, "Item catalog refreshed");
        Ok(count)
    }

    // -- Background refresh ----------------------------------------------

    /// Start the periodic refresh task. The first run happens one interval
    /// from now; callers do their own initial load.
    pub fn spawn_refresh(self: &Arc<Self>, schedule: RefreshSchedule) -> RefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut price_tick = interval_at(start + schedule.price_interval, schedule.price_interval);
            let mut catalog_tick =
                interval_at(start + schedule.catalog_interval, schedule.catalog_interval);
            price_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            catalog_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                price_secs = schedule.price_interval.as_secs(),
                catalog_secs = schedule.catalog_interval.as_secs(),
                "Price refresh task started"
            );

            loop {
                tokio::select! {
                    _ = price_tick.tick() => {
                        if let Err(e) = store.refresh_prices().await {
                            warn!(error = %e, "Price refresh failed, keeping cached prices");
                        }
                    }
                    _ = catalog_tick.tick() => {
                        if let Err(e) = store.refresh_item_catalog().await {
                            warn!(error = %e, "Catalog refresh failed, keeping cached catalog");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Price refresh task received shutdown");
                        break;
                    }
                }
            }
        });

        RefreshHandle { shutdown: shutdown_tx, task }
    }
}

/// Copy volume samples onto matching records. Unknown items are skipped.
fn apply_volumes(prices: &mut PriceMap, volumes: &VolumeMap) -> usize {
    let mut merged = 0;
    for (item_id, sample) in volumes {
        if let Some(snapshot) = prices.get_mut(item_id) {
            snapshot.high_volume = sample.high_volume;
            snapshot.low_volume = sample.low_volume;
            merged += 1;
        }
    }
    merged
}

/// Cadence for the background refresh task.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSchedule {
    pub price_interval: Duration,
    pub catalog_interval: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            price_interval: Duration::from_secs(60),
            catalog_interval: Duration::from_secs(3600),
        }
    }
}

/// Owner of the running refresh task.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Signal shutdown and wait for the task to exit. A refresh already
    /// in flight runs to completion first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Price refresh task ended abnormally");
        }
        info!("Price refresh task stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::MockSnapshotProvider;
    use crate::types::VolumeSample;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(high: i64, low: i64) -> PriceSnapshot {
        PriceSnapshot { high, high_time: 1_000, low, low_time: 1_000, ..Default::default() }
    }

    fn prices_of(entries: &[(u32, i64, i64)]) -> PriceMap {
        entries.iter().map(|&(id, h, l)| (id, snapshot(h, l))).collect()
    }

    fn catalog_of(ids: &[u32]) -> ItemMap {
        ids.iter().map(|&id| (id, ItemInfo::sample(id, &format!("Item {id}"), 100))).collect()
    }

    #[tokio::test]
    async fn test_refresh_replaces_prices_and_merges_volumes() {
        let mut mock = MockSnapshotProvider::new();
        mock.expect_fetch_prices()
            .times(1)
            .returning(|| Ok(prices_of(&[(1, 110, 100), (2, 55, 50)])));
        mock.expect_fetch_volumes().times(1).returning(|| {
            Ok(VolumeMap::from([
                (1, VolumeSample { high_volume: 30, low_volume: 40 }),
                (99, VolumeSample { high_volume: 1, low_volume: 1 }),
            ]))
        });

        let store = PriceStore::new(Arc::new(mock));
        assert!(store.last_refreshed().is_none());
        let count = store.refresh_prices().await.unwrap();

        assert_eq!(count, 2);
        let p = store.get_price(1).unwrap();
        assert_eq!((p.high_volume, p.low_volume), (30, 40));
        assert_eq!(store.get_price(2).unwrap().total_volume(), 0);
        assert!(store.get_price(99).is_none());
        assert!(store.last_refreshed().is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_cached_prices() {
        let mut mock = MockSnapshotProvider::new();
        let mut calls = 0;
        mock.expect_fetch_prices().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(prices_of(&[(1, 110, 100)]))
            } else {
                Err(anyhow!("upstream unreachable"))
            }
        });
        mock.expect_fetch_volumes().returning(|| Ok(VolumeMap::new()));

        let store = PriceStore::new(Arc::new(mock));
        store.refresh_prices().await.unwrap();
        assert!(store.refresh_prices().await.is_err());

        assert_eq!(store.price_count(), 1);
        assert_eq!(store.get_price(1).unwrap().high, 110);
    }

    #[tokio::test]
    async fn test_volume_failure_still_publishes_prices() {
        let mut mock = MockSnapshotProvider::new();
        mock.expect_fetch_prices().returning(|| Ok(prices_of(&[(7, 20, 10)])));
        mock.expect_fetch_volumes().returning(|| Err(anyhow!("5m endpoint down")));

        let store = PriceStore::new(Arc::new(mock));
        assert_eq!(store.refresh_prices().await.unwrap(), 1);
        assert_eq!(store.get_price(7).unwrap().low, 10);
    }

    #[tokio::test]
    async fn test_catalog_refresh_and_empty_rejection() {
        let mut mock = MockSnapshotProvider::new();
        let mut calls = 0;
        mock.expect_fetch_catalog().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(catalog_of(&[1, 2, 3]))
            } else {
                Ok(ItemMap::new())
            }
        });

        let store = PriceStore::new(Arc::new(mock));
        assert_eq!(store.refresh_item_catalog().await.unwrap(), 3);
        assert!(store.refresh_item_catalog().await.is_err());
        assert_eq!(store.item_count(), 3);
        assert_eq!(store.item_name(2).as_deref(), Some("Item 2"));

        let info = store.get_item_info(2).unwrap();
        assert_eq!(info.id, 2);
        assert_eq!(info.name, "Item 2");
        assert_eq!(info.limit, 100);
        assert!(store.get_item_info(99).is_none());
    }

    #[test]
    fn test_snapshot_arc_is_stable_across_replacement() {
        let store = PriceStore::new(Arc::new(MockSnapshotProvider::new()));
        store.replace_prices(prices_of(&[(1, 110, 100)]));
        let before = store.prices();

        store.replace_prices(prices_of(&[(1, 220, 200), (2, 5, 4)]));

        assert_eq!(before.len(), 1);
        assert_eq!(before[&1].high, 110);
        assert_eq!(store.prices().len(), 2);
    }

    #[test]
    fn test_apply_volumes_only_touches_volume_fields() {
        let mut prices = prices_of(&[(1, 110, 100)]);

        let merged = apply_volumes(
            &mut prices,
            &VolumeMap::from([
                (1, VolumeSample { high_volume: 5, low_volume: 6 }),
                (2, VolumeSample { high_volume: 9, low_volume: 9 }),
            ]),
        );

        assert_eq!(merged, 1);
        let p = prices[&1];
        assert_eq!((p.high, p.low, p.high_volume, p.low_volume), (110, 100, 5, 6));
        assert!(!prices.contains_key(&2));
    }

    #[tokio::test]
    async fn test_readers_never_see_prices_without_volumes() {
        let mut mock = MockSnapshotProvider::new();
        mock.expect_fetch_prices().returning(|| Ok(prices_of(&[(1, 110, 100)])));
        mock.expect_fetch_volumes().returning(|| {
            Ok(VolumeMap::from([(1, VolumeSample { high_volume: 5, low_volume: 6 })]))
        });

        let store = PriceStore::new(Arc::new(mock));
        store.replace_prices(prices_of(&[(1, 90, 80)]));
        let held = store.prices();

        store.refresh_prices().await.unwrap();

        // The first published view of the new generation already carries volumes.
        assert_eq!(store.prices()[&1].total_volume(), 11);
        assert_eq!(held[&1].high, 90);
        assert_eq!(held[&1].high_volume, 0);
    }

    struct CountingProvider {
        price_calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotProvider for CountingProvider {
        async fn fetch_prices(&self) -> Result<PriceMap> {
            let n = self.price_calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            Ok(prices_of(&[(1, 100 + n, 100)]))
        }

        async fn fetch_catalog(&self) -> Result<ItemMap> {
            Ok(catalog_of(&[1]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_ticks_and_stops() {
        let provider = Arc::new(CountingProvider { price_calls: AtomicUsize::new(0) });
        let store = Arc::new(PriceStore::new(provider.clone()));

        let handle = store.spawn_refresh(RefreshSchedule {
            price_interval: Duration::from_secs(60),
            catalog_interval: Duration::from_secs(3600),
        });

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get_price(1).unwrap().high, 102);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 2);
    }
}
