//! Mock snapshot provider for integration testing.
//!
//! Returns a fixed, controllable market with timestamps relative to the
//! moment of each fetch. Fetch counts and forced errors are observable
//! from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flipper::prices::SnapshotProvider;
use flipper::types::*;

/// One item in the mock market.
#[derive(Debug, Clone)]
pub struct MockItem {
    pub id: u32,
    pub name: &'static str,
    pub low: i64,
    pub high: i64,
    pub limit: u32,
    pub volume: u32,
    /// Minutes since the last trade on both sides.
    pub age_minutes: i64,
}

pub struct MockProvider {
    items: Arc<Mutex<Vec<MockItem>>>,
    /// If set, price fetches return this error.
    force_error: Arc<Mutex<Option<String>>>,
    price_fetches: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_items(Self::default_items())
    }

    pub fn with_items(items: Vec<MockItem>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
            force_error: Arc::new(Mutex::new(None)),
            price_fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Change the current prices for one item.
    pub fn set_prices(&self, id: u32, low: i64, high: i64) {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|i| i.id == id) {
            item.low = low;
            item.high = high;
        }
    }

    pub fn price_fetches(&self) -> usize {
        self.price_fetches.load(Ordering::SeqCst)
    }

    /// A small market covering every strategy profile.
    pub fn default_items() -> Vec<MockItem> {
        vec![
            // Cheap, liquid, high limit: bulk, active and overnight.
            MockItem { id: 453, name: "Coal", low: 150, high: 170, limit: 13_000, volume: 40_000, age_minutes: 1 },
            MockItem { id: 560, name: "Death rune", low: 200, high: 215, limit: 25_000, volume: 60_000, age_minutes: 2 },
            // Expensive, low limit: best margin only.
            MockItem { id: 11832, name: "Bandos chestplate", low: 20_000_000, high: 21_000_000, limit: 8, volume: 40, age_minutes: 10 },
            // Mid-price, older data: bulk/overnight windows only.
            MockItem { id: 2363, name: "Runite bar", low: 12_000, high: 12_600, limit: 10_000, volume: 3_000, age_minutes: 45 },
            // Spread eaten by tax.
            MockItem { id: 1515, name: "Yew logs", low: 300, high: 302, limit: 25_000, volume: 90_000, age_minutes: 1 },
        ]
    }
}

#[async_trait]
impl SnapshotProvider for MockProvider {
    async fn fetch_prices(&self) -> Result<PriceMap> {
        self.price_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }

        let now = Utc::now().timestamp();
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .map(|i| {
                let ts = now - i.age_minutes * 60;
                let snapshot = PriceSnapshot {
                    high: i.high,
                    high_time: ts,
                    low: i.low,
                    low_time: ts,
                    high_volume: 0,
                    low_volume: 0,
                };
                (i.id, snapshot)
            })
            .collect())
    }

    async fn fetch_volumes(&self) -> Result<VolumeMap> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .map(|i| {
                let sample = VolumeSample { high_volume: i.volume / 2, low_volume: i.volume - i.volume / 2 };
                (i.id, sample)
            })
            .collect())
    }

    async fn fetch_catalog(&self) -> Result<ItemMap> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .map(|i| {
                let info = ItemInfo {
                    id: i.id,
                    name: i.name.to_string(),
                    examine: String::new(),
                    members: true,
                    low_alch: 0,
                    high_alch: 0,
                    limit: i.limit,
                    value: 0,
                };
                (i.id, info)
            })
            .collect())
    }
}
