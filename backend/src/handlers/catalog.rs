//! Taxonomy and product HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{Product, TaxonomyEntry, TaxonomyKind};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::product::{
    CreateProductInput, ProductQuery, ProductService, SetActiveInput, UpdateProductInput,
};
use crate::services::taxonomy::{TaxonomyNameInput, TaxonomyService};
use crate::AppState;

fn parse_kind(raw: &str) -> AppResult<TaxonomyKind> {
    TaxonomyKind::parse(raw).ok_or_else(|| AppError::NotFound("Taxonomy".to_string()))
}

// ============================================================================
// Taxonomy
// ============================================================================

pub async fn list_taxonomy(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(kind): Path<String>,
) -> AppResult<Json<Vec<TaxonomyEntry>>> {
    let entries = TaxonomyService::new(state.db)
        .list(parse_kind(&kind)?)
        .await?;
    Ok(Json(entries))
}

pub async fn create_taxonomy(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(kind): Path<String>,
    Json(input): Json<TaxonomyNameInput>,
) -> AppResult<(StatusCode, Json<TaxonomyEntry>)> {
    user.require_admin()?;
    let entry = TaxonomyService::new(state.db)
        .create(&user.actor(), parse_kind(&kind)?, input)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn rename_taxonomy(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(input): Json<TaxonomyNameInput>,
) -> AppResult<Json<TaxonomyEntry>> {
    user.require_admin()?;
    let entry = TaxonomyService::new(state.db)
        .rename(&user.actor(), parse_kind(&kind)?, id, input)
        .await?;
    Ok(Json(entry))
}

pub async fn delete_taxonomy(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((kind, id)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    TaxonomyService::new(state.db)
        .delete(&user.actor(), parse_kind(&kind)?, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Products
// ============================================================================

pub async fn list_products(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let products = ProductService::new(state.db).list(query).await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    let product = ProductService::new(state.db).get(id).await?;
    Ok(Json(product))
}

pub async fn create_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateProductInput>,
) -> AppResult<(StatusCode, Json<Product>)> {
    user.require_admin()?;
    let product = ProductService::new(state.db)
        .create(&user.actor(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateProductInput>,
) -> AppResult<Json<Product>> {
    user.require_admin()?;
    let product = ProductService::new(state.db)
        .update(&user.actor(), id, input)
        .await?;
    Ok(Json(product))
}

pub async fn set_product_active(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<SetActiveInput>,
) -> AppResult<Json<Product>> {
    user.require_admin()?;
    let product = ProductService::new(state.db)
        .set_active(&user.actor(), id, input)
        .await?;
    Ok(Json(product))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("cultivar").unwrap(), TaxonomyKind::Cultivar);
        assert_eq!(parse_kind("species").unwrap(), TaxonomyKind::Species);
        assert!(matches!(parse_kind("cultivars"), Err(AppError::NotFound(_))));
    }
}
