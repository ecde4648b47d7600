//! GE offer tracker.
//!
//! Consumes order-change events from the host and keeps one slot state
//! per GE slot. Completed offers are archived per item; a completed sell
//! is matched against the most recently archived buy (LIFO) to produce a
//! flip, and 1-unit buy/sell pairs close together in time are recorded
//! as margin checks.
//!
//! All mutable state sits behind a single lock, so the host may deliver
//! events for different slots from different threads.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ledger::FlipLedger;
use crate::prices::PriceStore;
use crate::types::{
    ge_tax, CompletedFlip, MarginCheck, OfferEvent, OfferState, Side, TrackedOffer,
};

/// Number of concurrent GE slots.
pub const MAX_SLOTS: usize = 8;

/// 1-unit buys and sells must complete within this window to count as a
/// margin check.
const MARGIN_CHECK_WINDOW_SECS: i64 = 5 * 60;

// ---------------------------------------------------------------------------
// Slot state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Empty,
    Active(TrackedOffer),
}

/// How an order left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Terminal {
    Bought,
    Sold,
    Cancelled,
}

/// What a single event did to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OfferOutcome {
    /// The slot now holds an active offer.
    Tracking { offer: TrackedOffer },
    /// The tracked offer was cancelled and dropped.
    Cancelled { offer: TrackedOffer },
    /// The slot was cleared by the host.
    Cleared,
    /// The offer completed and was archived.
    Completed {
        terminal: Terminal,
        offer: TrackedOffer,
        flip: Option<CompletedFlip>,
        margin_check: Option<MarginCheck>,
    },
    /// Nothing to do: unknown slot, a terminal event for an untracked slot,
    /// or a completion whose side or item disagrees with the tracked offer.
    Ignored { reason: String },
}

/// A completed offer waiting in the per-item archive.
#[derive(Debug, Clone)]
struct ArchivedOffer {
    offer: TrackedOffer,
    completed_at: DateTime<Utc>,
}

struct TrackerState {
    slots: Vec<SlotState>,
    /// Unmatched buys per item, newest last.
    completed_buys: HashMap<u32, Vec<ArchivedOffer>>,
    /// Latest completed sell per item. Only the newest one is ever read.
    completed_sells: HashMap<u32, ArchivedOffer>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct OfferTracker {
    prices: Arc<PriceStore>,
    ledger: Arc<FlipLedger>,
    state: Mutex<TrackerState>,
}

impl OfferTracker {
    pub fn new(prices: Arc<PriceStore>, ledger: Arc<FlipLedger>) -> Self {
        Self {
            prices,
            ledger,
            state: Mutex::new(TrackerState {
                slots: vec![SlotState::Empty; MAX_SLOTS],
                completed_buys: HashMap::new(),
                completed_sells: HashMap::new(),
            }),
        }
    }

    pub fn handle_offer_event(&self, event: OfferEvent) -> OfferOutcome {
        self.handle_offer_event_at(event, Utc::now())
    }

    /// Apply one event with an explicit clock.
    pub fn handle_offer_event_at(&self, event: OfferEvent, now: DateTime<Utc>) -> OfferOutcome {
        if event.slot >= MAX_SLOTS {
            warn!(slot = event.slot, item_id = event.item_id, "Event for unknown GE slot ignored");
            return OfferOutcome::Ignored { reason: format!("slot {} out of range", event.slot) };
        }

        let mut state = self.state.lock();
        match event.state {
            OfferState::Buying | OfferState::Selling => Self::track(&mut state, &event, now),
            OfferState::CancelledBuy | OfferState::CancelledSell => {
                match std::mem::replace(&mut state.slots[event.slot], SlotState::Empty) {
                    SlotState::Active(offer) => {
                        debug!(slot = event.slot, item_id = offer.item_id, "Offer cancelled");
                        OfferOutcome::Cancelled { offer }
                    }
                    SlotState::Empty => OfferOutcome::Ignored {
                        reason: "cancel for an untracked slot".into(),
                    },
                }
            }
            OfferState::Empty => {
                state.slots[event.slot] = SlotState::Empty;
                OfferOutcome::Cleared
            }
            OfferState::Bought | OfferState::Sold => {
                let offer = match std::mem::replace(&mut state.slots[event.slot], SlotState::Empty)
                {
                    SlotState::Active(offer) => offer,
                    SlotState::Empty => {
                        debug!(slot = event.slot, "Completion for an untracked slot ignored");
                        return OfferOutcome::Ignored {
                            reason: "completion for an untracked slot".into(),
                        };
                    }
                };
                if event.state.side() != Some(offer.side) || event.item_id != offer.item_id {
                    warn!(
                        slot = event.slot,
                        tracked_item = offer.item_id,
                        tracked_side = %offer.side,
                        event_item = event.item_id,
                        event_state = ?event.state,
                        "Completion does not match the tracked offer, slot left as is"
                    );
                    let reason = format!(
                        "{:?} for item {} does not match tracked {} of item {}",
                        event.state, event.item_id, offer.side, offer.item_id
                    );
                    state.slots[event.slot] = SlotState::Active(offer);
                    return OfferOutcome::Ignored { reason };
                }
                self.complete(&mut state, offer, &event, now)
            }
        }
    }

    /// Create or refresh the active offer in a slot. The creation time
    /// survives fill updates to the same order.
    fn track(state: &mut TrackerState, event: &OfferEvent, now: DateTime<Utc>) -> OfferOutcome {
        let side = if event.state == OfferState::Buying { Side::Buy } else { Side::Sell };
        let slot = &mut state.slots[event.slot];

        let created_at = match slot {
            SlotState::Active(existing)
                if existing.item_id == event.item_id
                    && existing.side == side
                    && existing.price == event.price
                    && existing.quantity == event.total_quantity =>
            {
                existing.created_at
            }
            _ => now,
        };

        let offer = TrackedOffer {
            slot: event.slot,
            item_id: event.item_id,
            side,
            quantity: event.total_quantity,
            quantity_filled: event.quantity_sold,
            price: event.price,
            created_at,
        };
        debug!(
            slot = event.slot,
            item_id = event.item_id,
            side = %side,
            filled = event.quantity_sold,
            quantity = event.total_quantity,
            price = event.price,
            "Tracking offer"
        );
        *slot = SlotState::Active(offer.clone());
        OfferOutcome::Tracking { offer }
    }

    fn complete(
        &self,
        state: &mut TrackerState,
        mut offer: TrackedOffer,
        event: &OfferEvent,
        now: DateTime<Utc>,
    ) -> OfferOutcome {
        offer.quantity_filled = event.quantity_sold;
        let item_id = offer.item_id;
        let archived = ArchivedOffer { offer: offer.clone(), completed_at: now };

        let terminal = if offer.side == Side::Buy {
            state.completed_buys.entry(item_id).or_default().push(archived);
            debug!(item_id, filled = offer.quantity_filled, price = offer.price, "Completed buy");
            Terminal::Bought
        } else {
            state.completed_sells.insert(item_id, archived);
            debug!(item_id, filled = offer.quantity_filled, price = offer.price, "Completed sell");
            Terminal::Sold
        };

        // Margin-check detection runs before matching: matching consumes the buy
        // that the 1-unit pair is made of.
        let margin_check = if offer.quantity_filled == 1 {
            self.detect_margin_check(state, item_id, now)
        } else {
            None
        };

        let flip = match terminal {
            Terminal::Sold => self.match_flip(state, &offer, now),
            _ => None,
        };

        OfferOutcome::Completed { terminal, offer, flip, margin_check }
    }

    /// Pair a completed sell with the latest archived buy of the same item.
    fn match_flip(
        &self,
        state: &mut TrackerState,
        sell: &TrackedOffer,
        now: DateTime<Utc>,
    ) -> Option<CompletedFlip> {
        let buys = state.completed_buys.get_mut(&sell.item_id)?;
        let buy = &buys.last()?.offer;

        let quantity = buy.quantity_filled.min(sell.quantity_filled);
        let Some((tax, profit)) = flip_figures(buy.price, sell.price, quantity) else {
            warn!(
                item_id = sell.item_id,
                quantity,
                buy = buy.price,
                sell = sell.price,
                "Flip value out of range, buy left unmatched"
            );
            return None;
        };
        let buy = buys.pop()?.offer;

        let item_name = self
            .prices
            .item_name(sell.item_id)
            .unwrap_or_else(|| format!("Item #{}", sell.item_id));

        let flip = CompletedFlip {
            item_id: sell.item_id,
            item_name,
            buy_price: buy.price,
            sell_price: sell.price,
            quantity,
            profit,
            completed_at: now,
            ge_tax: tax,
        };
        info!(
            item = %flip.item_name,
            quantity,
            buy = buy.price,
            sell = sell.price,
            tax,
            profit,
            "Completed flip"
        );
        self.ledger.add_completed_flip(flip.clone());
        Some(flip)
    }

    /// Heuristic: a 1-unit buy and a 1-unit sell of the same item finishing
    /// within a few minutes of each other are a margin check.
    fn detect_margin_check(
        &self,
        state: &TrackerState,
        item_id: u32,
        now: DateTime<Utc>,
    ) -> Option<MarginCheck> {
        let last_buy = state.completed_buys.get(&item_id)?.last()?;
        let last_sell = state.completed_sells.get(&item_id)?;

        if last_buy.offer.quantity_filled != 1 || last_sell.offer.quantity_filled != 1 {
            return None;
        }
        let gap = (last_buy.completed_at - last_sell.completed_at).abs();
        if gap >= Duration::seconds(MARGIN_CHECK_WINDOW_SECS) {
            return None;
        }

        let check = MarginCheck {
            item_id,
            buy_price: last_buy.offer.price,
            sell_price: last_sell.offer.price,
            checked_at: now,
        };
        info!(item_id, buy = check.buy_price, sell = check.sell_price, "Margin check detected");
        self.ledger.add_margin_check(check);
        Some(check)
    }

    // -- Reads -----------------------------------------------------------

    /// Point-in-time copy of every active offer, ordered by slot.
    pub fn active_offers(&self) -> Vec<TrackedOffer> {
        self.state
            .lock()
            .slots
            .iter()
            .filter_map(|s| match s {
                SlotState::Active(offer) => Some(offer.clone()),
                SlotState::Empty => None,
            })
            .collect()
    }

    /// Whether the offer's price has drifted more than `threshold_percent`
    /// away from the live market (current low for buys, current high for
    /// sells), measured against the offer's own price. Unknown or zero
    /// prices never count as stale.
    pub fn is_offer_stale(&self, offer: &TrackedOffer, threshold_percent: f64) -> bool {
        let Some(current) = self.prices.get_price(offer.item_id) else {
            return false;
        };
        let market = match offer.side {
            Side::Buy => current.low,
            Side::Sell => current.high,
        };
        if market == 0 || offer.price == 0 {
            return false;
        }
        let drift = (offer.price - market).abs() as f64 / offer.price as f64 * 100.0;
        drift > threshold_percent
    }

    pub fn stale_offers(&self, threshold_percent: f64) -> Vec<TrackedOffer> {
        self.active_offers()
            .into_iter()
            .filter(|o| self.is_offer_stale(o, threshold_percent))
            .collect()
    }
}

/// Tax and net profit of selling `quantity` units bought at `buy` for
/// `sell`. `None` when the totals do not fit in an `i64`.
fn flip_figures(buy: i64, sell: i64, quantity: u32) -> Option<(i64, i64)> {
    let revenue = sell.checked_mul(i64::from(quantity))?;
    let cost = buy.checked_mul(i64::from(quantity))?;
    let tax = ge_tax(revenue);
    let profit = revenue.checked_sub(cost)?.checked_sub(tax)?;
    Some((tax, profit))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
