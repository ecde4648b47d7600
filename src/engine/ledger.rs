//! Flip ledger: realized profit and margin checks.
//!
//! Append-only record of completed flips keyed by item, a running
//! session-profit counter, and the latest margin check per item.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

use crate::types::{CompletedFlip, MarginCheck};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct LedgerState {
    flips: HashMap<u32, Vec<CompletedFlip>>,
    margin_checks: HashMap<u32, MarginCheck>,
    session_profit: i64,
    session_started_at: DateTime<Utc>,
}

pub struct FlipLedger {
    state: Mutex<LedgerState>,
}

impl Default for FlipLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FlipLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                flips: HashMap::new(),
                margin_checks: HashMap::new(),
                session_profit: 0,
                session_started_at: Utc::now(),
            }),
        }
    }

    pub fn add_completed_flip(&self, flip: CompletedFlip) {
        let mut state = self.state.lock();
        state.session_profit += flip.profit;
        state.flips.entry(flip.item_id).or_default().push(flip);
    }

    /// Record a margin check, replacing any earlier check for the item.
    pub fn add_margin_check(&self, check: MarginCheck) {
        self.state.lock().margin_checks.insert(check.item_id, check);
    }

    pub fn get_margin_check(&self, item_id: u32) -> Option<MarginCheck> {
        self.state.lock().margin_checks.get(&item_id).copied()
    }

    pub fn margin_checks(&self) -> Vec<MarginCheck> {
        let mut checks: Vec<_> = self.state.lock().margin_checks.values().copied().collect();
        checks.sort_by_key(|c| c.item_id);
        checks
    }

    pub fn flips_for_item(&self, item_id: u32) -> Vec<CompletedFlip> {
        self.state.lock().flips.get(&item_id).cloned().unwrap_or_default()
    }

    /// Sum over every stored flip. Computed on each call.
    pub fn total_profit(&self) -> i64 {
        self.state.lock().flips.values().flatten().map(|f| f.profit).sum()
    }

    pub fn session_profit(&self) -> i64 {
        self.state.lock().session_profit
    }

    pub fn total_flips(&self) -> usize {
        self.state.lock().flips.values().map(Vec::len).sum()
    }

    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.state.lock().session_started_at
    }

    /// Start a new session. Historical flips are kept.
    pub fn reset_session(&self) {
        let mut state = self.state.lock();
        info!(
            previous_profit = state.session_profit,
            since = %state.session_started_at,
            "Session reset"
        );
        state.session_profit = 0;
        state.session_started_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
