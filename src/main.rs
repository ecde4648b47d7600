//! FLIPPER: Grand Exchange flipping assistant
//!
//! Entry point. Loads configuration, initialises structured logging,
//! warms the price cache, starts the background refresh and the
//! dashboard, then logs the best opportunities per strategy on every
//! refresh interval until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use flipper::config;
use flipper::dashboard::{self, DashboardState};
use flipper::engine::ledger::FlipLedger;
use flipper::engine::opportunities::{OpportunityEngine, Strategy};
use flipper::engine::tracker::OfferTracker;
use flipper::export::OfferExporter;
use flipper::prices::wiki::WikiPriceClient;
use flipper::prices::{PriceStore, RefreshSchedule};

const BANNER: &str = r#"
  _____ _     ___ ____  ____  _____ ____
 |  ___| |   |_ _|  _ \|  _ \| ____|  _ \
 | |_  | |    | || |_) | |_) |  _| | |_) |
 |  _| | |___ | ||  __/|  __/| |___|  _ <
 |_|   |_____|___|_|   |_|   |_____|_| \_\

  Grand Exchange flipping assistant
  v0.1.0
"#;

/// Opportunities logged per strategy each interval.
const TOP_N: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("FLIPPER_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = config::AppConfig::load(&config_path)?;
    cfg.validate()?;

    init_logging();

    println!("{BANNER}");
    info!(
        api = %cfg.prices.api_base,
        refresh_secs = cfg.prices.refresh_interval_secs,
        budget = cfg.strategy.budget,
        "FLIPPER starting up"
    );

    // -- Price cache -----------------------------------------------------

    let provider = Arc::new(WikiPriceClient::new(&cfg.prices.api_base, &cfg.prices.user_agent)?);
    let store = Arc::new(PriceStore::new(provider));

    if let Err(e) = store.refresh_item_catalog().await {
        warn!(error = %e, "Initial catalog load failed, will retry on schedule");
    }
    if let Err(e) = store.refresh_prices().await {
        warn!(error = %e, "Initial price load failed, will retry on schedule");
    }

    let refresh = store.spawn_refresh(RefreshSchedule {
        price_interval: cfg.prices.refresh_interval(),
        catalog_interval: cfg.prices.catalog_interval(),
    });

    // -- Engine components -----------------------------------------------

    let ledger = Arc::new(FlipLedger::new());
    let tracker = Arc::new(OfferTracker::new(Arc::clone(&store), Arc::clone(&ledger)));
    let engine = Arc::new(OpportunityEngine::new(cfg.strategy.params()));

    if cfg.dashboard.enabled {
        let mut state = DashboardState::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&ledger),
            Arc::clone(&engine),
            cfg.strategy.clone(),
        );
        if cfg.export.enabled {
            info!(path = %cfg.export.path, "Offer export enabled");
            state = state.with_exporter(OfferExporter::new(&cfg.export.path));
        }
        dashboard::spawn_dashboard(Arc::new(state), cfg.dashboard.port).await?;
    }

    let strategies = [
        Strategy::BestMargin,
        Strategy::BulkVolume { min_limit: cfg.strategy.bulk_min_limit },
        Strategy::ActiveFlipping {
            max_price: cfg.strategy.active_max_price,
            min_profit: cfg.strategy.active_min_profit,
        },
        Strategy::Overnight,
    ];

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(cfg.prices.refresh_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.prices.refresh_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                report(&engine, &store, &tracker, &ledger, &strategies, cfg.strategy.stale_offer_threshold);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    refresh.stop().await;
    info!(
        session_profit = ledger.session_profit(),
        total_profit = ledger.total_profit(),
        flips = ledger.total_flips(),
        "FLIPPER shut down cleanly."
    );

    Ok(())
}

/// Log the top opportunities per strategy and any offers that need repricing.
fn report(
    engine: &OpportunityEngine,
    store: &PriceStore,
    tracker: &OfferTracker,
    ledger: &FlipLedger,
    strategies: &[Strategy],
    stale_threshold: f64,
) {
    if store.price_count() == 0 {
        warn!("No prices cached yet, skipping report");
        return;
    }

    for &strategy in strategies {
        let opportunities = engine.rank_store(strategy, store);
        for (rank, opp) in opportunities.iter().take(TOP_N).enumerate() {
            info!(strategy = %strategy, rank = rank + 1, "{opp}");
        }
    }

    for offer in tracker.stale_offers(stale_threshold) {
        warn!(
            offer = %offer,
            minutes = offer.minutes_in_market(chrono::Utc::now()),
            "Offer price drifted from the market"
        );
    }

    info!(
        session_profit = ledger.session_profit(),
        flips = ledger.total_flips(),
        active_offers = tracker.active_offers().len(),
        "Session summary"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flipper=info"));

    let json_logging = std::env::var("FLIPPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
