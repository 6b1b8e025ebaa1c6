//! Lot ledger HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use shared::{EntryInput, MovementHistory, StockEdit, StockView};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::history::HistoryService;
use crate::services::ledger::{
    AddressStock, ExitInput, LedgerService, StockListResponse, StockQuery, TransferInput,
    TransferResult,
};
use crate::AppState;

fn ledger(state: &AppState) -> LedgerService {
    LedgerService::new(state.db.clone(), state.signer.clone())
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub lot: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

/// Register an entry, merging into an existing row when the key matches
pub async fn create_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<EntryInput>,
) -> AppResult<(StatusCode, Json<StockView>)> {
    let stock = ledger(&state).create_entry(&user.actor(), input).await?;
    Ok((StatusCode::CREATED, Json(stock)))
}

/// Filtered stock list
pub async fn list_stock(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<StockQuery>,
) -> AppResult<Json<StockListResponse>> {
    let stock = ledger(&state).list(query).await?;
    Ok(Json(stock))
}

pub async fn get_stock(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(stock_id): Path<Uuid>,
) -> AppResult<Json<StockView>> {
    let stock = ledger(&state).get(stock_id).await?;
    Ok(Json(stock))
}

pub async fn get_balance(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(stock_id): Path<Uuid>,
) -> AppResult<Json<BalanceResponse>> {
    let balance = ledger(&state).balance(stock_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// Move units to another address
pub async fn transfer_stock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stock_id): Path<Uuid>,
    Json(input): Json<TransferInput>,
) -> AppResult<Json<TransferResult>> {
    let result = ledger(&state)
        .transfer(&user.actor(), stock_id, input)
        .await?;
    Ok(Json(result))
}

pub async fn register_exit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stock_id): Path<Uuid>,
    Json(input): Json<ExitInput>,
) -> AppResult<Json<StockView>> {
    let stock = ledger(&state)
        .register_exit(&user.actor(), stock_id, input)
        .await?;
    Ok(Json(stock))
}

pub async fn edit_stock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stock_id): Path<Uuid>,
    Json(edit): Json<StockEdit>,
) -> AppResult<Json<StockView>> {
    let stock = ledger(&state).edit(&user.actor(), stock_id, edit).await?;
    Ok(Json(stock))
}

pub async fn delete_stock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(stock_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    ledger(&state).delete(&user.actor(), stock_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// History of one row, oldest first
pub async fn stock_history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(stock_id): Path<Uuid>,
) -> AppResult<Json<Vec<MovementHistory>>> {
    let history = HistoryService::new(state.db).for_stock(stock_id).await?;
    Ok(Json(history))
}

/// Prefill data for an entry of a known lot
pub async fn lookup_lot(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<LookupQuery>,
) -> AppResult<Json<StockView>> {
    let stock = ledger(&state).lookup_lot(&query.lot).await?;
    Ok(Json(stock))
}

pub async fn address_stock(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(address): Path<String>,
) -> AppResult<Json<AddressStock>> {
    let stock = ledger(&state).address_stock(&address).await?;
    Ok(Json(stock))
}
