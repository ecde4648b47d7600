//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! The same routes double as the host ingress: order-change events are
//! POSTed here and the outcome is returned.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::StrategyConfig;
use crate::engine::ledger::FlipLedger;
use crate::engine::opportunities::{OpportunityEngine, Strategy};
use crate::engine::tracker::{OfferOutcome, OfferTracker};
use crate::export::OfferExporter;
use crate::prices::PriceStore;
use crate::types::{FlipOpportunity, FlipperError, MarginCheck, OfferEvent, TrackedOffer};

/// Opportunities returned when the caller gives no `limit`.
const DEFAULT_OPPORTUNITY_LIMIT: usize = 25;
const MAX_OPPORTUNITY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: Arc<PriceStore>,
    pub tracker: Arc<OfferTracker>,
    pub ledger: Arc<FlipLedger>,
    pub engine: Arc<OpportunityEngine>,
    pub exporter: Option<OfferExporter>,
    pub strategy: StrategyConfig,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(
        store: Arc<PriceStore>,
        tracker: Arc<OfferTracker>,
        ledger: Arc<FlipLedger>,
        engine: Arc<OpportunityEngine>,
        strategy: StrategyConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            ledger,
            engine,
            exporter: None,
            strategy,
            started_at: Utc::now(),
        }
    }

    pub fn with_exporter(mut self, exporter: OfferExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A domain error rendered as `{ "error": ... }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub FlipperError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            FlipperError::UnknownStrategy(_) | FlipperError::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

impl From<FlipperError> for ApiError {
    fn from(e: FlipperError) -> Self {
        Self(e)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub prices: usize,
    pub items: usize,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub active_offers: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpportunityQuery {
    pub min_limit: Option<u32>,
    pub max_price: Option<i64>,
    pub min_profit: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunitiesResponse {
    pub strategy: String,
    pub total: usize,
    pub opportunities: Vec<FlipOpportunity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: TrackedOffer,
    pub item_name: Option<String>,
    pub minutes_in_market: i64,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitResponse {
    pub session_profit: i64,
    pub total_profit: i64,
    pub total_flips: usize,
    pub session_started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let status = if state.store.price_count() > 0 { "READY" } else { "WARMING_UP" };

    Json(StatusResponse {
        status: status.to_string(),
        prices: state.store.price_count(),
        items: state.store.item_count(),
        last_refreshed: state.store.last_refreshed(),
        active_offers: state.tracker.active_offers().len(),
        uptime_secs: uptime,
    })
}

/// GET /api/opportunities/:strategy
pub async fn get_opportunities(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<OpportunityQuery>,
) -> Result<Json<OpportunitiesResponse>, ApiError> {
    let defaults = &state.strategy;
    let strategy = Strategy::parse_with(
        &name,
        Some(query.min_limit.unwrap_or(defaults.bulk_min_limit)),
        Some(query.max_price.unwrap_or(defaults.active_max_price)),
        Some(query.min_profit.unwrap_or(defaults.active_min_profit)),
    )?;

    let limit = query.limit.unwrap_or(DEFAULT_OPPORTUNITY_LIMIT).min(MAX_OPPORTUNITY_LIMIT);
    let mut opportunities = state.engine.rank_store(strategy, &state.store);
    let total = opportunities.len();
    opportunities.truncate(limit);

    Ok(Json(OpportunitiesResponse {
        strategy: strategy.to_string(),
        total,
        opportunities,
    }))
}

/// GET /api/offers
pub async fn get_offers(State(state): State<AppState>) -> Json<Vec<OfferView>> {
    let now = Utc::now();
    let threshold = state.strategy.stale_offer_threshold;

    let views = state
        .tracker
        .active_offers()
        .into_iter()
        .map(|offer| OfferView {
            item_name: state.store.item_name(offer.item_id),
            minutes_in_market: offer.minutes_in_market(now),
            stale: state.tracker.is_offer_stale(&offer, threshold),
            offer,
        })
        .collect();
    Json(views)
}

/// POST /api/offers/events
pub async fn post_offer_event(
    State(state): State<AppState>,
    Json(event): Json<OfferEvent>,
) -> Json<OfferOutcome> {
    let outcome = state.tracker.handle_offer_event(event);
    debug!(slot = event.slot, item_id = event.item_id, outcome = ?outcome, "Offer event handled");

    if let Some(exporter) = &state.exporter {
        // Export failures never fail the event.
        if let Err(e) = exporter.export(&state.tracker.active_offers(), &state.store) {
            warn!(path = %exporter.path().display(), error = %e, "Skipping offer export for this event");
        }
    }

    Json(outcome)
}

/// GET /api/profit
pub async fn get_profit(State(state): State<AppState>) -> Json<ProfitResponse> {
    Json(profit_summary(&state.ledger))
}

/// POST /api/session/reset
pub async fn reset_session(State(state): State<AppState>) -> Json<ProfitResponse> {
    state.ledger.reset_session();
    Json(profit_summary(&state.ledger))
}

/// GET /api/margin-checks/:item_id
pub async fn get_margin_check(
    State(state): State<AppState>,
    Path(item_id): Path<u32>,
) -> Result<Json<MarginCheck>, StatusCode> {
    state.ledger.get_margin_check(item_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

fn profit_summary(ledger: &FlipLedger) -> ProfitResponse {
    ProfitResponse {
        session_profit: ledger.session_profit(),
        total_profit: ledger.total_profit(),
        total_flips: ledger.total_flips(),
        session_started_at: ledger.session_started_at(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
