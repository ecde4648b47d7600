//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial file (or an empty one) is
//! valid. Range checks happen in [`AppConfig::validate`], before any
//! threshold reaches the opportunity engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::opportunities::StrategyParams;
use crate::types::FlipperError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub prices: PricesConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PricesConfig {
    pub api_base: String,
    pub user_agent: String,
    pub refresh_interval_secs: u64,
    pub catalog_refresh_secs: u64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            api_base: "https://prices.runescape.wiki/api/v1/dmm".to_string(),
            user_agent: "flipper/0.1 - GE flipping assistant".to_string(),
            refresh_interval_secs: 60,
            catalog_refresh_secs: 3600,
        }
    }
}

impl PricesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn catalog_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_refresh_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub min_profit: i64,
    pub min_roi: f64,
    pub max_roi: f64,
    pub max_age_minutes: i64,
    pub budget: i64,
    /// Percent drift from the market before an offer counts as stale.
    pub stale_offer_threshold: f64,
    pub bulk_min_limit: u32,
    pub active_max_price: i64,
    pub active_min_profit: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_profit: 100,
            min_roi: 3.0,
            max_roi: 200.0,
            max_age_minutes: 30,
            budget: 1_000_000,
            stale_offer_threshold: 10.0,
            bulk_min_limit: 1000,
            active_max_price: 25_000,
            active_min_profit: 1,
        }
    }
}

impl StrategyConfig {
    /// Engine thresholds derived from this section.
    pub fn params(&self) -> StrategyParams {
        StrategyParams {
            min_profit: self.min_profit,
            min_roi: self.min_roi,
            max_roi: self.max_roi,
            max_age_minutes: self.max_age_minutes,
            budget: self.budget,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "flipper-export/offers.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8787 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Check operator-facing ranges. Everything the engine receives has
    /// passed through here.
    pub fn validate(&self) -> Result<(), FlipperError> {
        let p = &self.prices;
        if !(30..=300).contains(&p.refresh_interval_secs) {
            return Err(FlipperError::Config(format!(
                "prices.refresh_interval_secs must be within 30..=300, got {}",
                p.refresh_interval_secs
            )));
        }
        if p.catalog_refresh_secs < p.refresh_interval_secs {
            return Err(FlipperError::Config(
                "prices.catalog_refresh_secs must not be shorter than the price refresh".into(),
            ));
        }
        if p.api_base.is_empty() {
            return Err(FlipperError::Config("prices.api_base is empty".into()));
        }

        let s = &self.strategy;
        if !(5.0..=50.0).contains(&s.stale_offer_threshold) {
            return Err(FlipperError::Config(format!(
                "strategy.stale_offer_threshold must be within 5..=50, got {}",
                s.stale_offer_threshold
            )));
        }
        if s.active_max_price <= 0 {
            return Err(FlipperError::Config("strategy.active_max_price must be positive".into()));
        }
        if s.active_min_profit < 0 {
            return Err(FlipperError::Config("strategy.active_min_profit must be >= 0".into()));
        }

        s.params()
            .validate()
            .map_err(|e| FlipperError::Config(e.to_string()))
    }
}
