//! Shared types for FLIPPER.
//!
//! These types form the data model used across all modules: price
//! snapshots and item metadata owned by the price store, tracked and
//! completed offers owned by the offer tracker, and the flips, margin
//! checks and opportunities handed back to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Grand Exchange tax rate, in percent of the sale value.
pub const GE_TAX_PERCENT: i64 = 1;

/// Hard ceiling on the tax charged for a single sale.
pub const GE_TAX_CAP: i64 = 5_000_000;

/// GE tax on a sale worth `sale_value`: 1% rounded down, capped.
pub fn ge_tax(sale_value: i64) -> i64 {
    if sale_value <= 0 {
        return 0;
    }
    (sale_value.saturating_mul(GE_TAX_PERCENT) / 100).min(GE_TAX_CAP)
}

// ---------------------------------------------------------------------------
// Item metadata
// ---------------------------------------------------------------------------

/// Static metadata for a tradeable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub examine: String,
    #[serde(default)]
    pub members: bool,
    #[serde(default, rename = "lowalch")]
    pub low_alch: i64,
    #[serde(default, rename = "highalch")]
    pub high_alch: i64,
    /// Max quantity per 4-hour buy-limit window. 0 means unknown/unlimited.
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub value: i64,
}

impl ItemInfo {
    /// Buy limit used for sizing. Unknown limits count as 1 so that nothing
    /// is ever sized against an imaginary quantity.
    pub fn effective_limit(&self) -> u32 {
        if self.limit > 0 {
            self.limit
        } else {
            1
        }
    }

    #[cfg(test)]
    pub fn sample(id: u32, name: &str, limit: u32) -> Self {
        ItemInfo {
            id,
            name: name.to_string(),
            examine: String::new(),
            members: true,
            low_alch: 0,
            high_alch: 0,
            limit,
            value: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Price snapshot
// ---------------------------------------------------------------------------

/// Latest instant-buy / instant-sell observation for one item.
///
/// `high` is the most recent sell-side price (what sellers get), `low` the
/// most recent buy-side price. Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub high: i64,
    pub high_time: i64,
    pub low: i64,
    pub low_time: i64,
    pub high_volume: u32,
    pub low_volume: u32,
}

impl PriceSnapshot {
    /// A snapshot missing either price or either timestamp carries no
    /// usable spread.
    pub fn is_complete(&self) -> bool {
        self.high != 0 && self.low != 0 && self.high_time != 0 && self.low_time != 0
    }

    /// Combined traded volume on both sides.
    pub fn total_volume(&self) -> u64 {
        self.high_volume as u64 + self.low_volume as u64
    }

    /// Timestamp of the more recent of the two observations.
    pub fn latest_time(&self) -> i64 {
        self.high_time.max(self.low_time)
    }
}

/// Traded volume for one item, as reported by the interval endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeSample {
    pub high_volume: u32,
    pub low_volume: u32,
}

pub type PriceMap = HashMap<u32, PriceSnapshot>;
pub type ItemMap = HashMap<u32, ItemInfo>;
pub type VolumeMap = HashMap<u32, VolumeSample>;

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// State reported by the host for a GE slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferState {
    Empty,
    Buying,
    Selling,
    Bought,
    Sold,
    CancelledBuy,
    CancelledSell,
}

impl OfferState {
    /// Side of the order this state belongs to. `Empty` has none.
    pub fn side(&self) -> Option<Side> {
        match self {
            OfferState::Buying | OfferState::Bought | OfferState::CancelledBuy => Some(Side::Buy),
            OfferState::Selling | OfferState::Sold | OfferState::CancelledSell => Some(Side::Sell),
            OfferState::Empty => None,
        }
    }
}

/// An order-change event delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEvent {
    pub slot: usize,
    pub item_id: u32,
    pub state: OfferState,
    pub total_quantity: u32,
    pub quantity_sold: u32,
    pub price: i64,
}

/// A live order occupying a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOffer {
    pub slot: usize,
    pub item_id: u32,
    pub side: Side,
    pub quantity: u32,
    pub quantity_filled: u32,
    pub price: i64,
    /// When the order was first seen. Not bumped by fill updates.
    pub created_at: DateTime<Utc>,
}

impl TrackedOffer {
    /// Whole minutes this order has been sitting in the market.
    pub fn minutes_in_market(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    /// Whether the order has been open longer than `threshold_minutes`.
    pub fn is_idle(&self, threshold_minutes: i64, now: DateTime<Utc>) -> bool {
        self.minutes_in_market(now) > threshold_minutes
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }
}

impl fmt::Display for TrackedOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[slot {}] {} item {} {}/{} @ {}gp",
            self.slot, self.side, self.item_id, self.quantity_filled, self.quantity, self.price,
        )
    }
}

// ---------------------------------------------------------------------------
// Flips and margin checks
// ---------------------------------------------------------------------------

/// A matched buy → sell pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedFlip {
    pub item_id: u32,
    pub item_name: String,
    pub buy_price: i64,
    pub sell_price: i64,
    pub quantity: u32,
    /// Net of tax.
    pub profit: i64,
    pub completed_at: DateTime<Utc>,
    pub ge_tax: i64,
}

impl CompletedFlip {
    /// Return on the capital committed to the buy side, in percent.
    pub fn roi(&self) -> f64 {
        let cost = self.buy_price * self.quantity as i64;
        if cost <= 0 {
            return 0.0;
        }
        self.profit as f64 / cost as f64 * 100.0
    }
}

impl fmt::Display for CompletedFlip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{}: {} -> {} (tax {}) = {}gp",
            self.item_name, self.quantity, self.buy_price, self.sell_price, self.ge_tax, self.profit,
        )
    }
}

/// A detected 1-unit buy/sell pair, giving the live spread for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginCheck {
    pub item_id: u32,
    pub buy_price: i64,
    pub sell_price: i64,
    pub checked_at: DateTime<Utc>,
}

impl MarginCheck {
    pub fn margin(&self) -> i64 {
        self.sell_price - self.buy_price
    }

    pub fn is_stale(&self, max_age_minutes: i64, now: DateTime<Utc>) -> bool {
        (now - self.checked_at).num_minutes() > max_age_minutes
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// How recent the underlying price data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Freshness {
    Fresh,
    Recent,
    Aging,
}

impl Freshness {
    pub fn from_age_minutes(age: i64) -> Self {
        match age {
            a if a <= 5 => Freshness::Fresh,
            a if a <= 30 => Freshness::Recent,
            _ => Freshness::Aging,
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Recent => write!(f, "recent"),
            Freshness::Aging => write!(f, "aging"),
        }
    }
}

/// A ranked trade idea produced by the opportunity engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipOpportunity {
    pub item_id: u32,
    pub item_name: String,
    pub buy_price: i64,
    pub sell_price: i64,
    /// Per unit, except for overnight holds where it covers the full hold.
    pub profit: i64,
    pub roi: f64,
    pub ge_tax: i64,
    pub limit: u32,
    pub age_minutes: i64,
    pub buy_volume: u32,
    pub sell_volume: u32,
    pub freshness: Freshness,
}

impl FlipOpportunity {
    pub fn total_cost(&self, quantity: u32) -> i64 {
        self.buy_price * quantity as i64
    }

    pub fn total_profit(&self, quantity: u32) -> i64 {
        self.profit * quantity as i64
    }

    /// Units affordable with `budget`, capped by the buy limit.
    pub fn max_quantity(&self, budget: i64) -> u32 {
        if self.buy_price <= 0 || budget <= 0 {
            return 0;
        }
        let affordable = (budget / self.buy_price).min(u32::MAX as i64) as u32;
        affordable.min(self.limit)
    }
}

impl fmt::Display for FlipOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (#{}) buy {} sell {} profit {} roi {:.2}% limit {} age {}m [{}]",
            self.item_name,
            self.item_id,
            self.buy_price,
            self.sell_price,
            self.profit,
            self.roi,
            self.limit,
            self.age_minutes,
            self.freshness,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for FLIPPER.
#[derive(Debug, thiserror::Error)]
pub enum FlipperError {
    #[error("Snapshot provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Export error: {0}")]
    Export(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
