//! Offer exporter.
//!
//! Writes the active offers to a JSON file for external tools. The file
//! is written to a sibling temp path and renamed into place, so a reader
//! never sees a half-written document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::prices::PriceStore;
use crate::types::{FlipperError, Side, TrackedOffer};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub offers: Vec<ExportedOffer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedOffer {
    pub item_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    pub side: Side,
    pub price: i64,
    pub quantity: u32,
    pub filled: u32,
    pub timestamp: DateTime<Utc>,
}

impl ExportDocument {
    pub fn build(offers: &[TrackedOffer], store: &PriceStore, now: DateTime<Utc>) -> Self {
        let offers = offers
            .iter()
            .map(|o| ExportedOffer {
                item_id: o.item_id,
                item_name: store.item_name(o.item_id),
                side: o.side,
                price: o.price,
                quantity: o.quantity,
                filled: o.quantity_filled,
                timestamp: o.created_at,
            })
            .collect();

        Self {
            timestamp: now,
            version: EXPORT_FORMAT_VERSION.to_string(),
            offers,
        }
    }
}

pub struct OfferExporter {
    path: PathBuf,
}

impl OfferExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Export `offers`, resolving item names through `store`.
    pub fn export(&self, offers: &[TrackedOffer], store: &PriceStore) -> Result<(), FlipperError> {
        let document = ExportDocument::build(offers, store, Utc::now());
        self.write(&document)?;
        debug!(path = %self.path.display(), offers = document.offers.len(), "Offers exported");
        Ok(())
    }

    fn write(&self, document: &ExportDocument) -> Result<(), FlipperError> {
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| FlipperError::Export(format!("serialise failed: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                FlipperError::Export(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)
            .map_err(|e| FlipperError::Export(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            FlipperError::Export(format!("cannot move export into {}: {e}", self.path.display()))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
