//! Product catalogue keyed by code

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{normalize_name, Actor, Product, TaxonomyKind};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::ledger::ensure_references;

/// Product service
#[derive(Clone)]
pub struct ProductService {
    db: PgPool,
}

/// Input for creating a product
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 50, message = "Code must be 1-50 characters"))]
    pub code: String,
    #[validate(length(max = 200, message = "Description must be at most 200 characters"))]
    #[serde(default)]
    pub description: String,
    pub cultivar_id: Uuid,
    #[validate(length(max = 50, message = "Type must be at most 50 characters"))]
    #[serde(default)]
    pub product_type: String,
    pub screen_id: Option<Uuid>,
    #[validate(length(max = 100, message = "Company must be at most 100 characters"))]
    #[serde(default)]
    pub company: String,
    pub species_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub treatment_id: Option<Uuid>,
}

/// Input for updating a product
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductInput {
    #[validate(length(max = 200, message = "Description must be at most 200 characters"))]
    pub description: Option<String>,
    pub cultivar_id: Option<Uuid>,
    #[validate(length(max = 50, message = "Type must be at most 50 characters"))]
    pub product_type: Option<String>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub screen_id: Option<Option<Uuid>>,
    #[validate(length(max = 100, message = "Company must be at most 100 characters"))]
    pub company: Option<String>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub species_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub category_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub treatment_id: Option<Option<Uuid>>,
}

/// Input for activating or deactivating a product
#[derive(Debug, Deserialize)]
pub struct SetActiveInput {
    pub active: bool,
}

/// Product listing filter
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    code: String,
    description: String,
    cultivar_id: Uuid,
    product_type: String,
    screen_id: Option<Uuid>,
    company: String,
    species_id: Option<Uuid>,
    category_id: Option<Uuid>,
    treatment_id: Option<Uuid>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            code: row.code,
            description: row.description,
            cultivar_id: row.cultivar_id,
            product_type: row.product_type,
            screen_id: row.screen_id,
            company: row.company,
            species_id: row.species_id,
            category_id: row.category_id,
            treatment_id: row.treatment_id,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PRODUCT_COLUMNS: &str = r#"
    id, code, description, cultivar_id, product_type, screen_id, company,
    species_id, category_id, treatment_id, active, created_at, updated_at
"#;

fn references(
    cultivar_id: Option<Uuid>,
    screen_id: Option<Uuid>,
    species_id: Option<Uuid>,
    category_id: Option<Uuid>,
    treatment_id: Option<Uuid>,
) -> Vec<(TaxonomyKind, Uuid)> {
    [
        (TaxonomyKind::Cultivar, cultivar_id),
        (TaxonomyKind::Screen, screen_id),
        (TaxonomyKind::Species, species_id),
        (TaxonomyKind::Category, category_id),
        (TaxonomyKind::Treatment, treatment_id),
    ]
    .into_iter()
    .filter_map(|(kind, id)| id.map(|id| (kind, id)))
    .collect()
}

impl ProductService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(&self, query: ProductQuery) -> AppResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE active OR $1 ORDER BY code",
            PRODUCT_COLUMNS
        ))
        .bind(query.include_inactive)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(row.into())
    }

    pub async fn create(&self, actor: &Actor, input: CreateProductInput) -> AppResult<Product> {
        input.validate()?;
        let code = normalize_name(&input.code);
        if code.is_empty() {
            return Err(AppError::validation("code", "Code is required"));
        }

        let mut tx = self.db.begin().await?;
        ensure_references(
            &mut tx,
            &references(
                Some(input.cultivar_id),
                input.screen_id,
                input.species_id,
                input.category_id,
                input.treatment_id,
            ),
        )
        .await?;

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (
                code, description, cultivar_id, product_type, screen_id, company,
                species_id, category_id, treatment_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&code)
        .bind(input.description.trim())
        .bind(input.cultivar_id)
        .bind(input.product_type.trim())
        .bind(input.screen_id)
        .bind(input.company.trim().to_uppercase())
        .bind(input.species_id)
        .bind(input.category_id)
        .bind(input.treatment_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(product_id = %row.id, code = %code, user_id = %actor.user_id, "Product created");
        Ok(row.into())
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdateProductInput,
    ) -> AppResult<Product> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        ensure_references(
            &mut tx,
            &references(
                input.cultivar_id,
                input.screen_id.flatten(),
                input.species_id.flatten(),
                input.category_id.flatten(),
                input.treatment_id.flatten(),
            ),
        )
        .await?;

        // NULL keeps a column; nullable columns take an explicit set flag so they can be cleared
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            UPDATE products SET
                description = COALESCE($2, description),
                cultivar_id = COALESCE($3, cultivar_id),
                product_type = COALESCE($4, product_type),
                screen_id = CASE WHEN $5 THEN $6 ELSE screen_id END,
                company = COALESCE($7, company),
                species_id = CASE WHEN $8 THEN $9 ELSE species_id END,
                category_id = CASE WHEN $10 THEN $11 ELSE category_id END,
                treatment_id = CASE WHEN $12 THEN $13 ELSE treatment_id END,
                updated_at = $14
            WHERE id = $1
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(input.description.as_deref().map(str::trim))
        .bind(input.cultivar_id)
        .bind(input.product_type.as_deref().map(str::trim))
        .bind(input.screen_id.is_some())
        .bind(input.screen_id.flatten())
        .bind(input.company.as_deref().map(|c| c.trim().to_uppercase()))
        .bind(input.species_id.is_some())
        .bind(input.species_id.flatten())
        .bind(input.category_id.is_some())
        .bind(input.category_id.flatten())
        .bind(input.treatment_id.is_some())
        .bind(input.treatment_id.flatten())
        .bind(actor.now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;
        tx.commit().await?;

        tracing::info!(product_id = %id, user_id = %actor.user_id, "Product updated");
        Ok(row.into())
    }

    pub async fn set_active(&self, actor: &Actor, id: Uuid, input: SetActiveInput) -> AppResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products SET active = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(input.active)
        .bind(actor.now)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        tracing::info!(product_id = %id, active = input.active, user_id = %actor.user_id, "Product activation changed");
        Ok(row.into())
    }
}
