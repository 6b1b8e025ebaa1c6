//! Taxonomy registry: cultivars, screens, categories, treatments and species
//!
//! The five tables share one shape, so one service drives them all. Table
//! and column names come from `TaxonomyKind`, never from request input.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{validate_name, Actor, TaxonomyEntry, TaxonomyKind};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Taxonomy service
#[derive(Clone)]
pub struct TaxonomyService {
    db: PgPool,
}

/// Input for creating or renaming an entry
#[derive(Debug, Deserialize)]
pub struct TaxonomyNameInput {
    pub name: String,
}

#[derive(Debug, FromRow)]
struct TaxonomyRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl TaxonomyRow {
    fn into_entry(self, kind: TaxonomyKind) -> TaxonomyEntry {
        TaxonomyEntry {
            id: self.id,
            kind,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

fn not_found(kind: TaxonomyKind) -> AppError {
    AppError::NotFound(kind.label_pt().to_string())
}

impl TaxonomyService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// All entries of a kind, by name
    pub async fn list(&self, kind: TaxonomyKind) -> AppResult<Vec<TaxonomyEntry>> {
        let rows = sqlx::query_as::<_, TaxonomyRow>(&format!(
            "SELECT id, name, created_at FROM {} ORDER BY name",
            kind.table()
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_entry(kind)).collect())
    }

    pub async fn create(
        &self,
        actor: &Actor,
        kind: TaxonomyKind,
        input: TaxonomyNameInput,
    ) -> AppResult<TaxonomyEntry> {
        let name = validate_name(&input.name).map_err(|m| AppError::validation("name", m))?;

        let row = sqlx::query_as::<_, TaxonomyRow>(&format!(
            "INSERT INTO {} (name) VALUES ($1) RETURNING id, name, created_at",
            kind.table()
        ))
        .bind(&name)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(kind = kind.as_str(), id = %row.id, name = %name, user_id = %actor.user_id, "Taxonomy entry created");
        Ok(row.into_entry(kind))
    }

    pub async fn rename(
        &self,
        actor: &Actor,
        kind: TaxonomyKind,
        id: Uuid,
        input: TaxonomyNameInput,
    ) -> AppResult<TaxonomyEntry> {
        let name = validate_name(&input.name).map_err(|m| AppError::validation("name", m))?;

        let row = sqlx::query_as::<_, TaxonomyRow>(&format!(
            "UPDATE {} SET name = $2 WHERE id = $1 RETURNING id, name, created_at",
            kind.table()
        ))
        .bind(id)
        .bind(&name)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| not_found(kind))?;

        tracing::info!(kind = kind.as_str(), id = %id, name = %name, user_id = %actor.user_id, "Taxonomy entry renamed");
        Ok(row.into_entry(kind))
    }

    /// Delete an entry no stock or product points at
    pub async fn delete(&self, actor: &Actor, kind: TaxonomyKind, id: Uuid) -> AppResult<()> {
        let column = kind.reference_column();
        let mut tx = self.db.begin().await?;

        sqlx::query_scalar::<_, Uuid>(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(kind))?;

        let referenced = sqlx::query_scalar::<_, bool>(&format!(
            r#"
            SELECT EXISTS(SELECT 1 FROM stocks WHERE {col} = $1)
                OR EXISTS(SELECT 1 FROM products WHERE {col} = $1)
            "#,
            col = column
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if referenced {
            return Err(AppError::ReferentialProtection(
                kind.label_pt().to_string(),
            ));
        }

        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.table()))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(kind = kind.as_str(), id = %id, user_id = %actor.user_id, "Taxonomy entry deleted");
        Ok(())
    }
}
