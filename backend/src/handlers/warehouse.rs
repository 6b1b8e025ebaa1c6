//! Warehouse layout and occupancy HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{ElementSpec, MapDocument, MapElement, WarehouseLayout};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::warehouse::{
    CreateWarehouseInput, ImportResult, OccupancyResponse, UpdateWarehouseInput,
    WarehouseService,
};
use crate::AppState;

pub async fn list_warehouses(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<WarehouseLayout>>> {
    let list = WarehouseService::new(state.db).list_warehouses().await?;
    Ok(Json(list))
}

pub async fn create_warehouse(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateWarehouseInput>,
) -> AppResult<(StatusCode, Json<WarehouseLayout>)> {
    user.require_admin()?;
    let warehouse = WarehouseService::new(state.db)
        .create_warehouse(&user.actor(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(warehouse)))
}

pub async fn get_warehouse(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<i32>,
) -> AppResult<Json<WarehouseLayout>> {
    let warehouse = WarehouseService::new(state.db).get_warehouse(number).await?;
    Ok(Json(warehouse))
}

pub async fn update_warehouse(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<i32>,
    Json(input): Json<UpdateWarehouseInput>,
) -> AppResult<Json<WarehouseLayout>> {
    user.require_admin()?;
    let warehouse = WarehouseService::new(state.db)
        .update_warehouse(&user.actor(), number, input)
        .await?;
    Ok(Json(warehouse))
}

/// Layouts for every numeric `az` present in the ledger
pub async fn auto_create_warehouses(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<WarehouseLayout>>> {
    user.require_admin()?;
    let created = WarehouseService::new(state.db)
        .auto_create_warehouses(&user.actor())
        .await?;
    Ok(Json(created))
}

pub async fn list_elements(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<i32>,
) -> AppResult<Json<Vec<MapElement>>> {
    let elements = WarehouseService::new(state.db).list_elements(number).await?;
    Ok(Json(elements))
}

/// Replace the whole scene in one transaction
pub async fn save_elements(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<i32>,
    Json(elements): Json<Vec<ElementSpec>>,
) -> AppResult<Json<Vec<MapElement>>> {
    let saved = WarehouseService::new(state.db)
        .save_all_elements(&user.actor(), number, elements)
        .await?;
    Ok(Json(saved))
}

pub async fn export_map(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<i32>,
) -> AppResult<Json<MapDocument>> {
    let document = WarehouseService::new(state.db).export_json(number).await?;
    Ok(Json(document))
}

pub async fn import_map(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(document): Json<MapDocument>,
) -> AppResult<Json<ImportResult>> {
    user.require_admin()?;
    let result = WarehouseService::new(state.db)
        .import_json(&user.actor(), document)
        .await?;
    Ok(Json(result))
}

pub async fn warehouse_occupancy(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<i32>,
) -> AppResult<Json<OccupancyResponse>> {
    let occupancy = WarehouseService::new(state.db).occupancy(number).await?;
    Ok(Json(occupancy))
}
