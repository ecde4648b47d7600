//! End-to-end flipping session over the mock provider.

use chrono::{Duration, Utc};
use std::sync::Arc;

use flipper::engine::ledger::FlipLedger;
use flipper::engine::opportunities::{OpportunityEngine, Strategy, StrategyParams};
use flipper::engine::tracker::{OfferOutcome, OfferTracker, Terminal};
use flipper::prices::{PriceStore, RefreshSchedule};
use flipper::types::{OfferEvent, OfferState};

use crate::mock_provider::MockProvider;

struct Session {
    provider: Arc<MockProvider>,
    store: Arc<PriceStore>,
    ledger: Arc<FlipLedger>,
    tracker: OfferTracker,
    engine: OpportunityEngine,
}

async fn session() -> Session {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(PriceStore::new(provider.clone()));
    store.refresh_item_catalog().await.unwrap();
    store.refresh_prices().await.unwrap();

    let ledger = Arc::new(FlipLedger::new());
    let tracker = OfferTracker::new(Arc::clone(&store), Arc::clone(&ledger));
    let engine = OpportunityEngine::new(StrategyParams {
        min_profit: 10,
        budget: 50_000_000,
        ..StrategyParams::default()
    });

    Session { provider, store, ledger, tracker, engine }
}

fn event(slot: usize, item_id: u32, state: OfferState, total: u32, sold: u32, price: i64) -> OfferEvent {
    OfferEvent { slot, item_id, state, total_quantity: total, quantity_sold: sold, price }
}

fn ids(opps: &[flipper::types::FlipOpportunity]) -> Vec<u32> {
    opps.iter().map(|o| o.item_id).collect()
}

#[tokio::test]
async fn test_store_warm_up() {
    let s = session().await;
    assert_eq!(s.store.item_count(), 5);
    assert_eq!(s.store.price_count(), 5);
    assert!(s.store.last_refreshed().is_some());

    let coal = s.store.get_price(453).unwrap();
    assert_eq!(coal.total_volume(), 40_000);
    assert_eq!(s.store.item_name(560).as_deref(), Some("Death rune"));
}

#[tokio::test]
async fn test_rankings_across_strategies() {
    let s = session().await;

    let best = s.engine.best_margin(&s.store);
    assert_eq!(ids(&best), vec![11832, 453, 560]);
    assert_eq!(best[0].profit, 790_000);

    let bulk = s.engine.bulk_volume(&s.store, 1_000);
    assert_eq!(bulk[0].item_id, 2363);
    let mut bulk_ids = ids(&bulk);
    bulk_ids.sort();
    assert_eq!(bulk_ids, vec![453, 560, 2363]);

    let active = s.engine.active_flipping(&s.store, 25_000, 1);
    assert_eq!(ids(&active), vec![453, 560]);

    let overnight = s.engine.overnight(&s.store);
    assert_eq!(ids(&overnight), vec![2363, 560, 453]);
    assert_eq!(overnight[0].profit, 474 * 10_000 * 2);

    // Yew logs lose money after tax in every strategy.
    for strategy in [
        Strategy::BestMargin,
        Strategy::BulkVolume { min_limit: 1 },
        Strategy::ActiveFlipping { max_price: i64::MAX, min_profit: 0 },
        Strategy::Overnight,
    ] {
        assert!(s.engine.rank_store(strategy, &s.store).iter().all(|o| o.item_id != 1515));
    }
}

#[tokio::test]
async fn test_full_flip_cycle() {
    let s = session().await;
    let t0 = Utc::now();

    s.tracker.handle_offer_event_at(event(0, 453, OfferState::Buying, 1_000, 0, 150), t0);
    s.tracker
        .handle_offer_event_at(event(0, 453, OfferState::Buying, 1_000, 400, 150), t0 + Duration::minutes(3));
    assert_eq!(s.tracker.active_offers()[0].created_at, t0);

    let bought = s
        .tracker
        .handle_offer_event_at(event(0, 453, OfferState::Bought, 1_000, 1_000, 150), t0 + Duration::minutes(8));
    assert!(matches!(bought, OfferOutcome::Completed { terminal: Terminal::Bought, flip: None, .. }));
    assert!(s.tracker.active_offers().is_empty());

    s.tracker.handle_offer_event_at(event(3, 453, OfferState::Selling, 1_000, 0, 170), t0 + Duration::minutes(9));
    let sold = s
        .tracker
        .handle_offer_event_at(event(3, 453, OfferState::Sold, 1_000, 1_000, 170), t0 + Duration::minutes(20));

    let OfferOutcome::Completed { flip: Some(flip), margin_check, .. } = sold else {
        panic!("expected a completed flip, got {sold:?}");
    };
    assert!(margin_check.is_none());
    assert_eq!(flip.item_name, "Coal");
    assert_eq!(flip.quantity, 1_000);
    assert_eq!(flip.ge_tax, 1_700);
    assert_eq!(flip.profit, 170_000 - 150_000 - 1_700);

    assert_eq!(s.ledger.session_profit(), 18_300);
    assert_eq!(s.ledger.flips_for_item(453).len(), 1);
}

#[tokio::test]
async fn test_margin_check_and_stale_offer() {
    let s = session().await;
    let t0 = Utc::now();

    s.tracker.handle_offer_event_at(event(0, 560, OfferState::Buying, 1, 0, 200), t0);
    s.tracker.handle_offer_event_at(event(0, 560, OfferState::Bought, 1, 1, 200), t0 + Duration::seconds(20));
    s.tracker.handle_offer_event_at(event(1, 560, OfferState::Selling, 1, 0, 215), t0 + Duration::seconds(30));
    s.tracker.handle_offer_event_at(event(1, 560, OfferState::Sold, 1, 1, 215), t0 + Duration::seconds(90));

    let check = s.ledger.get_margin_check(560).unwrap();
    assert_eq!((check.buy_price, check.sell_price), (200, 215));
    assert_eq!(check.margin(), 15);

    // Now a real buy at the checked price, and the market drops away.
    s.tracker.handle_offer_event_at(event(2, 560, OfferState::Buying, 5_000, 0, 200), t0 + Duration::minutes(2));
    assert!(s.tracker.stale_offers(10.0).is_empty());

    s.provider.set_prices(560, 150, 180);
    s.store.refresh_prices().await.unwrap();
    let stale = s.tracker.stale_offers(10.0);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].slot, 2);
}

#[tokio::test]
async fn test_refresh_failure_keeps_previous_prices() {
    let s = session().await;
    let before = s.store.get_price(453).unwrap();

    s.provider.set_error("upstream 503");
    assert!(s.store.refresh_prices().await.is_err());
    assert_eq!(s.store.get_price(453).unwrap(), before);
    assert_eq!(s.store.price_count(), 5);

    s.provider.clear_error();
    s.provider.set_prices(453, 140, 180);
    s.store.refresh_prices().await.unwrap();
    let after = s.store.get_price(453).unwrap();
    assert_eq!((after.low, after.high), (140, 180));
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_publishes_new_generation() {
    let s = session().await;
    let fetches = s.provider.price_fetches();
    let generation = s.store.prices();

    let handle = s.store.spawn_refresh(RefreshSchedule {
        price_interval: std::time::Duration::from_secs(30),
        catalog_interval: std::time::Duration::from_secs(3_600),
    });

    s.provider.set_prices(560, 190, 230);
    tokio::time::sleep(std::time::Duration::from_secs(31)).await;

    assert!(s.provider.price_fetches() > fetches);
    assert_eq!(s.store.get_price(560).unwrap().high, 230);
    // Earlier readers still hold the old generation intact.
    assert_eq!(generation[&560].high, 215);

    handle.stop().await;
}
