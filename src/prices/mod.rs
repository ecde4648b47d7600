//! Market data.
//!
//! Defines the `SnapshotProvider` trait (the boundary to whatever fetches
//! and decodes upstream price data), the shared `PriceStore` cache, and
//! the provider for the public wiki price API.

pub mod store;
pub mod wiki;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ItemMap, PriceMap, VolumeMap};

pub use store::{PriceStore, RefreshHandle, RefreshSchedule};

/// Source of decoded price and item records.
///
/// Every call yields a complete replacement set; the store never asks
/// for deltas. Missing or zero fields are allowed and are filtered out
/// downstream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Latest price observation per item.
    async fn fetch_prices(&self) -> Result<PriceMap>;

    /// Traded volume per item. Providers without volume data return an
    /// empty map.
    async fn fetch_volumes(&self) -> Result<VolumeMap> {
        Ok(VolumeMap::new())
    }

    /// Full item catalog.
    async fn fetch_catalog(&self) -> Result<ItemMap>;
}
