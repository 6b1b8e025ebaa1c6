//! Empenho (two-phase movement) HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{Empenho, EmpenhoDetail, EmpenhoHeader, ItemEmpenho, PaginatedResponse};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::empenho::{
    AddItemInput, CreateEmpenhoInput, EditItemInput, EmpenhoQuery, EmpenhoService,
    ExecutionReport,
};
use crate::AppState;

fn service(state: &AppState) -> EmpenhoService {
    EmpenhoService::new(state.db.clone(), state.signer.clone())
}

/// Own empenhos, or all of them for an admin
pub async fn list_empenhos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<EmpenhoQuery>,
) -> AppResult<Json<PaginatedResponse<Empenho>>> {
    let list = service(&state).list(&user.actor(), query).await?;
    Ok(Json(list))
}

pub async fn create_empenho(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateEmpenhoInput>,
) -> AppResult<(StatusCode, Json<Empenho>)> {
    let empenho = service(&state).create_draft(&user.actor(), input).await?;
    Ok((StatusCode::CREATED, Json(empenho)))
}

pub async fn get_empenho(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
) -> AppResult<Json<EmpenhoDetail>> {
    let detail = service(&state).get(&user.actor(), empenho_id).await?;
    Ok(Json(detail))
}

pub async fn update_header(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
    Json(header): Json<EmpenhoHeader>,
) -> AppResult<Json<Empenho>> {
    let empenho = service(&state)
        .update_header(&user.actor(), empenho_id, header)
        .await?;
    Ok(Json(empenho))
}

pub async fn add_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
    Json(input): Json<AddItemInput>,
) -> AppResult<(StatusCode, Json<ItemEmpenho>)> {
    let item = service(&state)
        .add_item(&user.actor(), empenho_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn edit_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((empenho_id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<EditItemInput>,
) -> AppResult<Json<ItemEmpenho>> {
    let item = service(&state)
        .edit_item(&user.actor(), empenho_id, item_id, input)
        .await?;
    Ok(Json(item))
}

pub async fn remove_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((empenho_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    service(&state)
        .remove_item(&user.actor(), empenho_id, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DRAFT -> CONFIRMED, checking feasibility
pub async fn confirm_empenho(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
) -> AppResult<Json<EmpenhoDetail>> {
    let detail = service(&state).confirm(&user.actor(), empenho_id).await?;
    Ok(Json(detail))
}

/// CONFIRMED -> EXECUTED, applying every item to the ledger
pub async fn execute_empenho(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
) -> AppResult<Json<ExecutionReport>> {
    let report = service(&state).execute(&user.actor(), empenho_id).await?;
    Ok(Json(report))
}

pub async fn cancel_empenho(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(empenho_id): Path<Uuid>,
) -> AppResult<Json<Empenho>> {
    let empenho = service(&state).cancel(&user.actor(), empenho_id).await?;
    Ok(Json(empenho))
}
