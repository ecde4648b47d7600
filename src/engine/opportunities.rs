//! Opportunity engine: ranks current spreads into flip ideas.
//!
//! Every strategy runs through the same pipeline over one price
//! generation:
//!
//! 1. Drop incomplete snapshots and items without metadata.
//! 2. Compute tax, per-unit profit, ROI, effective limit and data age.
//! 3. Drop unprofitable and unaffordable items.
//! 4. Apply the strategy profile (age window, thresholds, volume/limit).
//! 5. Score, then sort (stable, with item id as the final tiebreak).
//!
//! The engine holds only thresholds, so identical inputs always produce
//! identical, identically ordered output.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::prices::PriceStore;
use crate::types::{
    ge_tax, FlipOpportunity, FlipperError, Freshness, ItemInfo, ItemMap, PriceMap, PriceSnapshot,
};

// ---------------------------------------------------------------------------
// Strategy constants
// ---------------------------------------------------------------------------

/// Bulk looks back at least this far, whatever the configured max age.
const BULK_MIN_AGE_WINDOW: i64 = 60;
const BULK_MIN_VOLUME: u64 = 50;

/// Active flipping never trusts data older than this.
const ACTIVE_MAX_AGE_WINDOW: i64 = 5;

const OVERNIGHT_MIN_AGE_WINDOW: i64 = 120;
const OVERNIGHT_MIN_LIMIT: u32 = 5_000;
const OVERNIGHT_MIN_VOLUME: u64 = 100;

/// Buy-limit cycles assumed over an overnight hold.
pub const OVERNIGHT_ESTIMATED_CYCLES: i64 = 2;

pub const DEFAULT_BULK_MIN_LIMIT: u32 = 1_000;
pub const DEFAULT_ACTIVE_MAX_PRICE: i64 = 25_000;
pub const DEFAULT_ACTIVE_MIN_PROFIT: i64 = 1;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Operator thresholds shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub min_profit: i64,
    /// Percent.
    pub min_roi: f64,
    /// Percent. Filters out fake margins on illiquid items.
    pub max_roi: f64,
    pub max_age_minutes: i64,
    pub budget: i64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_profit: 100,
            min_roi: 3.0,
            max_roi: 200.0,
            max_age_minutes: 30,
            budget: 1_000_000,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), FlipperError> {
        if self.min_profit < 0 {
            return Err(FlipperError::InvalidParameter(format!(
                "min_profit must be >= 0, got {}",
                self.min_profit
            )));
        }
        if self.budget < 0 {
            return Err(FlipperError::InvalidParameter(format!(
                "budget must be >= 0, got {}",
                self.budget
            )));
        }
        if !self.min_roi.is_finite() || !self.max_roi.is_finite() || self.min_roi < 0.0 {
            return Err(FlipperError::InvalidParameter("ROI bounds must be finite and >= 0".into()));
        }
        if self.min_roi > self.max_roi {
            return Err(FlipperError::InvalidParameter(format!(
                "min_roi ({}) exceeds max_roi ({})",
                self.min_roi, self.max_roi
            )));
        }
        if self.max_age_minutes < 1 {
            return Err(FlipperError::InvalidParameter(format!(
                "max_age_minutes must be >= 1, got {}",
                self.max_age_minutes
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Ranking strategy, with its per-call overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    /// Highest per-unit profit on fresh data.
    BestMargin,
    /// High-limit, liquid items where volume multiplies a thin margin.
    BulkVolume { min_limit: u32 },
    /// Cheap, liquid items that turn over within minutes.
    ActiveFlipping { max_price: i64, min_profit: i64 },
    /// Large-limit items to hold while offline.
    Overnight,
}

impl Strategy {
    pub const NAMES: &'static [&'static str] = &["best-margin", "bulk", "active", "overnight"];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::BestMargin => "best-margin",
            Strategy::BulkVolume { .. } => "bulk",
            Strategy::ActiveFlipping { .. } => "active",
            Strategy::Overnight => "overnight",
        }
    }

    /// Parse a strategy name, filling overrides from the given values or
    /// the defaults.
    pub fn parse_with(
        name: &str,
        min_limit: Option<u32>,
        max_price: Option<i64>,
        min_profit: Option<i64>,
    ) -> Result<Self, FlipperError> {
        let strategy = match name.to_lowercase().as_str() {
            "best-margin" | "best_margin" | "margin" => Strategy::BestMargin,
            "bulk" | "bulk-volume" | "bulk_volume" => Strategy::BulkVolume {
                min_limit: min_limit.unwrap_or(DEFAULT_BULK_MIN_LIMIT),
            },
            "active" | "active-flipping" | "active_flipping" => Strategy::ActiveFlipping {
                max_price: max_price.unwrap_or(DEFAULT_ACTIVE_MAX_PRICE),
                min_profit: min_profit.unwrap_or(DEFAULT_ACTIVE_MIN_PROFIT),
            },
            "overnight" => Strategy::Overnight,
            _ => return Err(FlipperError::UnknownStrategy(name.to_string())),
        };

        match strategy {
            Strategy::ActiveFlipping { max_price, min_profit } if max_price <= 0 || min_profit < 0 => {
                Err(FlipperError::InvalidParameter(
                    "active flipping needs max_price > 0 and min_profit >= 0".into(),
                ))
            }
            _ => Ok(strategy),
        }
    }

    /// Age window in minutes for this strategy given the configured max.
    fn age_window(&self, configured: i64) -> i64 {
        match self {
            Strategy::BestMargin => configured,
            Strategy::BulkVolume { .. } => configured.max(BULK_MIN_AGE_WINDOW),
            Strategy::ActiveFlipping { .. } => configured.min(ACTIVE_MAX_AGE_WINDOW),
            Strategy::Overnight => configured.max(OVERNIGHT_MIN_AGE_WINDOW),
        }
    }
}

impl FromStr for Strategy {
    type Err = FlipperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::parse_with(s, None, None, None)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Pipeline internals
// ---------------------------------------------------------------------------

/// Per-item figures computed once and shared by every filter.
struct Candidate<'a> {
    item_id: u32,
    info: &'a ItemInfo,
    snapshot: PriceSnapshot,
    buy_price: i64,
    sell_price: i64,
    tax: i64,
    profit: i64,
    roi: f64,
    limit: u32,
    buy_age: i64,
    sell_age: i64,
    /// Age of the newer observation, for display.
    age: i64,
}

impl Candidate<'_> {
    fn volume(&self) -> u64 {
        self.snapshot.total_volume()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Incomplete,
    NoMetadata,
    Unprofitable,
    Budget,
    Age,
    Profit,
    Roi,
    Profile,
}

/// Filter outcome counts for one run, logged for tuning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total: usize,
    pub incomplete: usize,
    pub no_metadata: usize,
    pub unprofitable: usize,
    pub budget: usize,
    pub age: usize,
    pub profit: usize,
    pub roi: usize,
    pub profile: usize,
    pub accepted: usize,
}

impl FilterStats {
    fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Incomplete => self.incomplete += 1,
            Rejection::NoMetadata => self.no_metadata += 1,
            Rejection::Unprofitable => self.unprofitable += 1,
            Rejection::Budget => self.budget += 1,
            Rejection::Age => self.age += 1,
            Rejection::Profit => self.profit += 1,
            Rejection::Roi => self.roi += 1,
            Rejection::Profile => self.profile += 1,
        }
    }
}

fn age_minutes(now: i64, timestamp: i64) -> i64 {
    (now - timestamp) / 60
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct OpportunityEngine {
    params: StrategyParams,
}

impl OpportunityEngine {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Rank the current contents of a price store.
    pub fn rank_store(&self, strategy: Strategy, store: &PriceStore) -> Vec<FlipOpportunity> {
        let now = chrono::Utc::now().timestamp();
        self.rank(strategy, &store.prices(), &store.items(), now)
    }

    pub fn best_margin(&self, store: &PriceStore) -> Vec<FlipOpportunity> {
        self.rank_store(Strategy::BestMargin, store)
    }

    pub fn bulk_volume(&self, store: &PriceStore, min_limit: u32) -> Vec<FlipOpportunity> {
        self.rank_store(Strategy::BulkVolume { min_limit }, store)
    }

    pub fn active_flipping(
        &self,
        store: &PriceStore,
        max_price: i64,
        min_profit: i64,
    ) -> Vec<FlipOpportunity> {
        self.rank_store(Strategy::ActiveFlipping { max_price, min_profit }, store)
    }

    pub fn overnight(&self, store: &PriceStore) -> Vec<FlipOpportunity> {
        self.rank_store(Strategy::Overnight, store)
    }

    /// Run one strategy over a price generation. `now` is unix seconds.
    pub fn rank(
        &self,
        strategy: Strategy,
        prices: &PriceMap,
        items: &ItemMap,
        now: i64,
    ) -> Vec<FlipOpportunity> {
        self.rank_with_stats(strategy, prices, items, now).0
    }

    pub fn rank_with_stats(
        &self,
        strategy: Strategy,
        prices: &PriceMap,
        items: &ItemMap,
        now: i64,
    ) -> (Vec<FlipOpportunity>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut scored: Vec<(FlipOpportunity, f64, f64)> = Vec::new();

        for (&item_id, snapshot) in prices {
            stats.total += 1;

            let candidate = match self
                .evaluate(item_id, snapshot, items, now)
                .and_then(|c| self.admit(strategy, c))
            {
                Ok(c) => c,
                Err(rejection) => {
                    stats.record(rejection);
                    continue;
                }
            };

            let (primary, secondary) = Self::score(strategy, &candidate);
            scored.push((Self::to_opportunity(strategy, &candidate), primary, secondary));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
                .then_with(|| a.0.item_id.cmp(&b.0.item_id))
        });

        let opportunities: Vec<FlipOpportunity> = scored.into_iter().map(|(o, _, _)| o).collect();
        stats.accepted = opportunities.len();

        debug!(strategy = %strategy, stats = ?stats, "Filter breakdown");
        info!(
            strategy = %strategy,
            items = stats.total,
            found = stats.accepted,
            top = opportunities.first().map(|o| o.item_name.as_str()).unwrap_or("-"),
            "Opportunity ranking complete"
        );

        (opportunities, stats)
    }

    /// Shared per-item checks and figures.
    fn evaluate<'a>(
        &self,
        item_id: u32,
        snapshot: &PriceSnapshot,
        items: &'a ItemMap,
        now: i64,
    ) -> Result<Candidate<'a>, Rejection> {
        if !snapshot.is_complete() {
            return Err(Rejection::Incomplete);
        }
        let info = items.get(&item_id).ok_or(Rejection::NoMetadata)?;

        let buy_price = snapshot.low;
        let sell_price = snapshot.high;
        let tax = ge_tax(sell_price);
        let profit = sell_price - buy_price - tax;
        if profit <= 0 {
            return Err(Rejection::Unprofitable);
        }

        let limit = info.effective_limit();
        let budget = self.params.budget;
        if buy_price * limit as i64 > budget && buy_price > budget {
            return Err(Rejection::Budget);
        }

        Ok(Candidate {
            item_id,
            info,
            snapshot: *snapshot,
            buy_price,
            sell_price,
            tax,
            profit,
            roi: profit as f64 / buy_price as f64 * 100.0,
            limit,
            buy_age: age_minutes(now, snapshot.low_time),
            sell_age: age_minutes(now, snapshot.high_time),
            age: age_minutes(now, snapshot.latest_time()),
        })
    }

    /// Strategy-specific admission.
    fn admit<'a>(&self, strategy: Strategy, c: Candidate<'a>) -> Result<Candidate<'a>, Rejection> {
        let p = &self.params;

        let window = strategy.age_window(p.max_age_minutes);
        if c.buy_age > window || c.sell_age > window {
            return Err(Rejection::Age);
        }

        let in_roi_band = c.roi >= p.min_roi && c.roi <= p.max_roi;
        match strategy {
            Strategy::BestMargin => {
                if c.profit < p.min_profit {
                    return Err(Rejection::Profit);
                }
                if !in_roi_band {
                    return Err(Rejection::Roi);
                }
            }
            Strategy::BulkVolume { min_limit } => {
                if c.profit < p.min_profit {
                    return Err(Rejection::Profit);
                }
                if !in_roi_band {
                    return Err(Rejection::Roi);
                }
                if c.limit < min_limit || c.volume() < BULK_MIN_VOLUME {
                    return Err(Rejection::Profile);
                }
            }
            Strategy::ActiveFlipping { max_price, min_profit } => {
                if c.profit < min_profit {
                    return Err(Rejection::Profit);
                }
                if c.buy_price > max_price || c.volume() == 0 {
                    return Err(Rejection::Profile);
                }
            }
            Strategy::Overnight => {
                // No per-unit profit floor.
                if c.limit < OVERNIGHT_MIN_LIMIT || c.volume() < OVERNIGHT_MIN_VOLUME {
                    return Err(Rejection::Profile);
                }
            }
        }
        Ok(c)
    }

    /// (primary, secondary) sort keys, both descending.
    fn score(strategy: Strategy, c: &Candidate<'_>) -> (f64, f64) {
        let profit = c.profit as f64;
        let limit = c.limit as f64;
        let volume_factor = ((c.volume() + 1) as f64).ln();

        match strategy {
            Strategy::BestMargin => (profit, c.roi),
            Strategy::BulkVolume { .. } => (profit * volume_factor * limit.sqrt(), profit * limit),
            Strategy::ActiveFlipping { .. } => (profit * volume_factor, profit),
            Strategy::Overnight => ((c.profit * c.limit as i64 * OVERNIGHT_ESTIMATED_CYCLES) as f64, c.roi),
        }
    }

    fn to_opportunity(strategy: Strategy, c: &Candidate<'_>) -> FlipOpportunity {
        let profit = match strategy {
            Strategy::Overnight => c.profit * c.limit as i64 * OVERNIGHT_ESTIMATED_CYCLES,
            _ => c.profit,
        };

        FlipOpportunity {
            item_id: c.item_id,
            item_name: c.info.name.clone(),
            buy_price: c.buy_price,
            sell_price: c.sell_price,
            profit,
            roi: c.roi,
            ge_tax: c.tax,
            limit: c.limit,
            age_minutes: c.age,
            buy_volume: c.snapshot.low_volume,
            sell_volume: c.snapshot.high_volume,
            freshness: Freshness::from_age_minutes(c.age),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
