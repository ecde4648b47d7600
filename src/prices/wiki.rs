//! Wiki real-time prices API provider.
//!
//! Pulls the instant-buy/sell feed, the 5-minute volume feed and the
//! item mapping from the public prices API. Response parsing is kept in
//! free functions so it can be tested without network access.
//!
//! Base URL: https://prices.runescape.wiki/api/v1/{game}
//! Endpoints: `/latest`, `/5m`, `/mapping`
//! Auth: none, but a descriptive User-Agent is required.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::SnapshotProvider;
use crate::types::{
    FlipperError, ItemInfo, ItemMap, PriceMap, PriceSnapshot, VolumeMap, VolumeSample,
};

const PROVIDER_NAME: &str = "wiki";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: HashMap<u32, T>,
}

/// `/latest` entry. Any field may be null for thinly traded items.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestEntry {
    #[serde(default)]
    high: Option<i64>,
    #[serde(default)]
    high_time: Option<i64>,
    #[serde(default)]
    low: Option<i64>,
    #[serde(default)]
    low_time: Option<i64>,
}

/// `/5m` entry. Only the volumes are used.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntervalEntry {
    #[serde(default)]
    high_price_volume: Option<u32>,
    #[serde(default)]
    low_price_volume: Option<u32>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_latest(body: &str) -> Result<PriceMap> {
    let envelope: DataEnvelope<LatestEntry> =
        serde_json::from_str(body).context("Failed to parse /latest response")?;
    Ok(envelope
        .data
        .into_iter()
        .map(|(id, e)| {
            let snapshot = PriceSnapshot {
                high: e.high.unwrap_or(0),
                high_time: e.high_time.unwrap_or(0),
                low: e.low.unwrap_or(0),
                low_time: e.low_time.unwrap_or(0),
                high_volume: 0,
                low_volume: 0,
            };
            (id, snapshot)
        })
        .collect())
}

pub fn parse_volumes(body: &str) -> Result<VolumeMap> {
    let envelope: DataEnvelope<IntervalEntry> =
        serde_json::from_str(body).context("Failed to parse /5m response")?;
    Ok(envelope
        .data
        .into_iter()
        .map(|(id, e)| {
            let sample = VolumeSample {
                high_volume: e.high_price_volume.unwrap_or(0),
                low_volume: e.low_price_volume.unwrap_or(0),
            };
            (id, sample)
        })
        .collect())
}

pub fn parse_mapping(body: &str) -> Result<ItemMap> {
    let items: Vec<ItemInfo> =
        serde_json::from_str(body).context("Failed to parse /mapping response")?;
    Ok(items.into_iter().map(|i| (i.id, i)).collect())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WikiPriceClient {
    http: Client,
    base_url: String,
}

impl WikiPriceClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_body(&self, endpoint: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FlipperError::Provider {
                provider: PROVIDER_NAME.to_string(),
                message: format!("GET {url} returned {status}"),
            }
            .into());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read body from {url}"))?;
        debug!(url = %url, bytes = body.len(), "Fetched");
        Ok(body)
    }
}

#[async_trait]
impl SnapshotProvider for WikiPriceClient {
    async fn fetch_prices(&self) -> Result<PriceMap> {
        parse_latest(&self.get_body("latest").await?)
    }

    async fn fetch_volumes(&self) -> Result<VolumeMap> {
        parse_volumes(&self.get_body("5m").await?)
    }

    async fn fetch_catalog(&self) -> Result<ItemMap> {
        parse_mapping(&self.get_body("mapping").await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest() {
        let body = r#"{"data":{
            "2":{"high":165,"highTime":1700000100,"low":160,"lowTime":1700000050},
            "6":{"high":null,"highTime":null,"low":190000,"lowTime":1700000000}
        }}"#;
        let prices = parse_latest(body).unwrap();
        assert_eq!(prices.len(), 2);

        let cannonball = prices[&2];
        assert_eq!(cannonball.high, 165);
        assert_eq!(cannonball.low_time, 1700000050);
        assert!(cannonball.is_complete());

        let half = prices[&6];
        assert_eq!(half.high, 0);
        assert!(!half.is_complete());
    }

    #[test]
    fn test_parse_volumes() {
        let body = r#"{"data":{
            "2":{"avgHighPrice":166,"highPriceVolume":4200,"avgLowPrice":161,"lowPriceVolume":3900},
            "6":{"avgHighPrice":null,"highPriceVolume":0,"avgLowPrice":190000,"lowPriceVolume":2}
        },"timestamp":1700000100}"#;
        let volumes = parse_volumes(body).unwrap();
        assert_eq!(volumes[&2], VolumeSample { high_volume: 4200, low_volume: 3900 });
        assert_eq!(volumes[&6].low_volume, 2);
    }

    #[test]
    fn test_parse_mapping() {
        let body = r#"[
            {"examine":"Ammo for the Dwarf Cannon.","id":2,"members":true,"lowalch":2,"limit":11000,"value":5,"highalch":3,"icon":"Cannonball.png","name":"Cannonball"},
            {"id":6,"name":"Cannon base","members":true}
        ]"#;
        let items = parse_mapping(body).unwrap();
        assert_eq!(items[&2].name, "Cannonball");
        assert_eq!(items[&2].limit, 11_000);
        assert_eq!(items[&2].high_alch, 3);
        assert_eq!(items[&6].limit, 0);
        assert_eq!(items[&6].effective_limit(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_latest("not json").is_err());
        assert!(parse_volumes(r#"{"nodata":{}}"#).is_err());
        assert!(parse_mapping(r#"{"data":[]}"#).is_err());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WikiPriceClient::new("https://example.invalid/api/", "flipper-test").unwrap();
        assert_eq!(client.base_url, "https://example.invalid/api");
    }
}
