//! Thin HTTP glue over the round engine. Every handler here delegates
//! to the core components; none of the domain logic lives in this
//! module.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::accounts::AccountManager;
use crate::domain::{Account, Duration, RoundStatus, Side};
use crate::error::QFlashError;
use crate::house::HouseBank;
use crate::price_feed::PriceFeed;
use crate::store::SqliteStore;

pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub feed: Arc<PriceFeed>,
    pub accounts: Arc<AccountManager>,
    pub house: Arc<HouseBank>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/price", get(get_price))
        .route("/rounds", get(list_rounds))
        .route("/rounds/:id", get(get_round))
        .route("/bet", post(place_bet))
        .route("/account/:address", get(get_account))
        .route("/withdrawal", post(request_withdrawal))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::request_logging_simple))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct PriceQuery {
    pair: Option<String>,
}

async fn get_price(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<serde_json::Value>, QFlashError> {
    let pair = query
        .pair
        .ok_or_else(|| QFlashError::InvalidIdentifier("pair".to_string()))?;
    let now_ms = state.store.now().await? * 1000;
    let quote = state.feed.price_for(&pair, false, now_ms).await?;
    Ok(Json(json!({
        "pair": quote.pair,
        "medianPrice": quote.median_price,
        "sources": quote.sources,
        "fetchedAt": quote.fetched_at,
    })))
}

#[derive(Deserialize)]
pub struct RoundsQuery {
    pair: Option<String>,
    duration: Option<i64>,
    status: Option<String>,
}

async fn list_rounds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoundsQuery>,
) -> Result<Json<serde_json::Value>, QFlashError> {
    let duration = query.duration.and_then(Duration::from_seconds);
    let status = query.status.as_deref().and_then(RoundStatus::parse);
    let rounds = state
        .store
        .list_rounds(query.pair.as_deref(), duration, status)
        .await?;
    Ok(Json(json!({ "count": rounds.len(), "rounds": rounds })))
}

async fn get_round(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, QFlashError> {
    let round = state
        .store
        .get_round(&id)
        .await?
        .ok_or(QFlashError::RoundNotFound)?;
    let snapshots = state.store.snapshots_for_round(&id).await?;
    Ok(Json(json!({ "round": round, "snapshots": snapshots })))
}

#[derive(Deserialize)]
pub struct BetRequest {
    #[serde(rename = "roundId")]
    round_id: String,
    side: String,
    #[serde(rename = "amountQU")]
    amount_qu: i64,
    address: Option<String>,
}

#[derive(Serialize)]
pub struct BetResponse {
    #[serde(rename = "entryId")]
    entry_id: String,
    #[serde(rename = "roundId")]
    round_id: String,
    side: String,
    #[serde(rename = "amountQU")]
    amount_qu: i64,
    #[serde(rename = "newBalance")]
    new_balance: i64,
}

async fn place_bet(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(body): Json<BetRequest>,
) -> Result<Json<BetResponse>, QFlashError> {
    let account = authenticate(&state, auth.token()).await?;

    if let Some(requested) = &body.address {
        if requested != &account.address {
            return Err(QFlashError::Forbidden);
        }
    }

    let side = Side::parse(&body.side).ok_or_else(|| QFlashError::InvalidIdentifier("side".to_string()))?;

    let entry = state
        .accounts
        .place_wager(&state.store, &state.house, &account.address, &body.round_id, side, body.amount_qu)
        .await?;

    let updated = state
        .store
        .get_account(&account.address)
        .await?
        .ok_or(QFlashError::AccountNotFound)?;

    Ok(Json(BetResponse {
        entry_id: entry.id,
        round_id: entry.round_id,
        side: entry.side.as_str().to_string(),
        amount_qu: entry.amount_qu,
        new_balance: updated.balance_qu,
    }))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, QFlashError> {
    let account = authenticate(&state, auth.token()).await?;
    if account.address != address {
        return Err(QFlashError::Forbidden);
    }
    let transactions = state.store.transactions_for_address(&address, 50).await?;
    Ok(Json(json!({ "account": account, "recentTransactions": transactions })))
}

#[derive(Deserialize)]
pub struct WithdrawalRequest {
    destination: String,
    #[serde(rename = "amountQU")]
    amount_qu: i64,
}

async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(body): Json<WithdrawalRequest>,
) -> Result<Json<serde_json::Value>, QFlashError> {
    let account = authenticate(&state, auth.token()).await?;
    let tx = state
        .accounts
        .request_withdrawal(&state.store, &account.address, &body.destination, body.amount_qu)
        .await?;
    Ok(Json(json!({ "transaction": tx })))
}

async fn authenticate(state: &AppState, token: &str) -> Result<Account, QFlashError> {
    state
        .accounts
        .authenticate(&state.store, &format!("Bearer {token}"))
        .await?
        .ok_or(QFlashError::Unauthorized)
}
