//! Warehouse layouts, map elements and occupancy

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    normalize_scene, parse_warehouse_number, resolve_occupancy, validate_canvas, Actor,
    AddressBalance, ElementKind, ElementOccupancy, ElementSpec, MapDocument, MapElement,
    WarehouseLayout, DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Warehouse layout service
#[derive(Clone)]
pub struct WarehouseService {
    db: PgPool,
}

/// Input for creating a warehouse
#[derive(Debug, Deserialize, Validate)]
pub struct CreateWarehouseInput {
    #[validate(range(min = 1, message = "Warehouse number must be positive"))]
    pub number: i32,
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    pub canvas_width: Option<i32>,
    pub canvas_height: Option<i32>,
}

/// Input for updating a warehouse
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateWarehouseInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    pub canvas_width: Option<i32>,
    pub canvas_height: Option<i32>,
    pub active: Option<bool>,
}

/// Occupancy of the addressed elements of one warehouse
#[derive(Debug, Serialize)]
pub struct OccupancyResponse {
    pub warehouse_number: i32,
    pub elements: BTreeMap<Uuid, ElementOccupancy>,
}

/// A warehouse imported from a map document
#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub warehouse: WarehouseLayout,
    pub elements: Vec<MapElement>,
    pub created: bool,
}

#[derive(Debug, FromRow)]
struct WarehouseRow {
    id: Uuid,
    number: i32,
    name: String,
    canvas_width: i32,
    canvas_height: i32,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WarehouseRow> for WarehouseLayout {
    fn from(row: WarehouseRow) -> Self {
        WarehouseLayout {
            id: row.id,
            number: row.number,
            name: row.name,
            canvas_width: row.canvas_width,
            canvas_height: row.canvas_height,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ElementRow {
    id: Uuid,
    warehouse_id: Uuid,
    kind: String,
    identifier: Option<String>,
    pos_x: f64,
    pos_y: f64,
    width: f64,
    height: f64,
    rotation: f64,
    z_order: i32,
    text_content: Option<String>,
    style: Option<serde_json::Value>,
}

impl TryFrom<ElementRow> for MapElement {
    type Error = AppError;

    fn try_from(row: ElementRow) -> Result<Self, Self::Error> {
        let kind = ElementKind::parse(&row.kind)
            .ok_or_else(|| AppError::Internal(format!("unknown element kind {}", row.kind)))?;
        Ok(MapElement {
            id: row.id,
            warehouse_id: row.warehouse_id,
            spec: ElementSpec {
                kind,
                identifier: row.identifier,
                pos_x: row.pos_x,
                pos_y: row.pos_y,
                width: row.width,
                height: row.height,
                rotation: row.rotation,
                z_order: row.z_order,
                text_content: row.text_content,
                style: row.style,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct AddressBalanceRow {
    address: String,
    total_balance: i64,
    lot_count: i64,
    total_weight: Decimal,
}

const WAREHOUSE_COLUMNS: &str =
    "id, number, name, canvas_width, canvas_height, active, created_at, updated_at";

const ELEMENT_COLUMNS: &str = r#"
    id, warehouse_id, kind, identifier, pos_x, pos_y, width, height, rotation, z_order,
    text_content, style
"#;

// ============================================================================
// Transactional helpers
// ============================================================================

async fn lock_warehouse(conn: &mut PgConnection, number: i32) -> AppResult<WarehouseLayout> {
    let row = sqlx::query_as::<_, WarehouseRow>(&format!(
        "SELECT {} FROM warehouses WHERE number = $1 FOR UPDATE",
        WAREHOUSE_COLUMNS
    ))
    .bind(number)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;

    Ok(row.into())
}

async fn fetch_elements(conn: &mut PgConnection, warehouse_id: Uuid) -> AppResult<Vec<MapElement>> {
    let rows = sqlx::query_as::<_, ElementRow>(&format!(
        "SELECT {} FROM map_elements WHERE warehouse_id = $1 ORDER BY z_order, id",
        ELEMENT_COLUMNS
    ))
    .bind(warehouse_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(MapElement::try_from).collect()
}

/// Delete every element of a warehouse and insert the given scene
async fn replace_elements(
    conn: &mut PgConnection,
    warehouse_id: Uuid,
    elements: &[ElementSpec],
) -> AppResult<Vec<MapElement>> {
    sqlx::query("DELETE FROM map_elements WHERE warehouse_id = $1")
        .bind(warehouse_id)
        .execute(&mut *conn)
        .await?;

    let mut saved = Vec::with_capacity(elements.len());
    for element in elements {
        let row = sqlx::query_as::<_, ElementRow>(&format!(
            r#"
            INSERT INTO map_elements (
                warehouse_id, kind, identifier, pos_x, pos_y, width, height, rotation,
                z_order, text_content, style
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            ELEMENT_COLUMNS
        ))
        .bind(warehouse_id)
        .bind(element.kind.as_str())
        .bind(&element.identifier)
        .bind(element.pos_x)
        .bind(element.pos_y)
        .bind(element.width)
        .bind(element.height)
        .bind(element.rotation)
        .bind(element.z_order)
        .bind(&element.text_content)
        .bind(&element.style)
        .fetch_one(&mut *conn)
        .await?;
        saved.push(MapElement::try_from(row)?);
    }

    sqlx::query("UPDATE warehouses SET updated_at = NOW() WHERE id = $1")
        .bind(warehouse_id)
        .execute(&mut *conn)
        .await?;

    Ok(saved)
}

fn canvas_or_default(width: Option<i32>, height: Option<i32>) -> AppResult<(i32, i32)> {
    let width = width.unwrap_or(DEFAULT_CANVAS_WIDTH);
    let height = height.unwrap_or(DEFAULT_CANVAS_HEIGHT);
    validate_canvas(width, height).map_err(|m| AppError::validation("canvas", m))?;
    Ok((width, height))
}

/// Default name of a warehouse created from the ledger
fn default_name(number: i32) -> String {
    format!("Armazém {}", number)
}

impl WarehouseService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create_warehouse(
        &self,
        actor: &Actor,
        input: CreateWarehouseInput,
    ) -> AppResult<WarehouseLayout> {
        input.validate()?;
        let (width, height) = canvas_or_default(input.canvas_width, input.canvas_height)?;

        let row = sqlx::query_as::<_, WarehouseRow>(&format!(
            r#"
            INSERT INTO warehouses (number, name, canvas_width, canvas_height)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            WAREHOUSE_COLUMNS
        ))
        .bind(input.number)
        .bind(input.name.trim())
        .bind(width)
        .bind(height)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(number = row.number, user_id = %actor.user_id, "Warehouse created");
        Ok(row.into())
    }

    pub async fn update_warehouse(
        &self,
        actor: &Actor,
        number: i32,
        input: UpdateWarehouseInput,
    ) -> AppResult<WarehouseLayout> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        let current = lock_warehouse(&mut tx, number).await?;
        let width = input.canvas_width.unwrap_or(current.canvas_width);
        let height = input.canvas_height.unwrap_or(current.canvas_height);
        validate_canvas(width, height).map_err(|m| AppError::validation("canvas", m))?;

        let row = sqlx::query_as::<_, WarehouseRow>(&format!(
            r#"
            UPDATE warehouses SET
                name = $2, canvas_width = $3, canvas_height = $4, active = $5, updated_at = $6
            WHERE id = $1
            RETURNING {}
            "#,
            WAREHOUSE_COLUMNS
        ))
        .bind(current.id)
        .bind(input.name.as_deref().map(str::trim).unwrap_or(&current.name))
        .bind(width)
        .bind(height)
        .bind(input.active.unwrap_or(current.active))
        .bind(actor.now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(number, user_id = %actor.user_id, "Warehouse updated");
        Ok(row.into())
    }

    pub async fn list_warehouses(&self) -> AppResult<Vec<WarehouseLayout>> {
        let rows = sqlx::query_as::<_, WarehouseRow>(&format!(
            "SELECT {} FROM warehouses ORDER BY number",
            WAREHOUSE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(WarehouseLayout::from).collect())
    }

    pub async fn get_warehouse(&self, number: i32) -> AppResult<WarehouseLayout> {
        let row = sqlx::query_as::<_, WarehouseRow>(&format!(
            "SELECT {} FROM warehouses WHERE number = $1",
            WAREHOUSE_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;

        Ok(row.into())
    }

    pub async fn list_elements(&self, number: i32) -> AppResult<Vec<MapElement>> {
        let warehouse = self.get_warehouse(number).await?;
        let mut conn = self.db.acquire().await?;
        fetch_elements(&mut conn, warehouse.id).await
    }

    /// Replace the whole scene of a warehouse
    pub async fn save_all_elements(
        &self,
        actor: &Actor,
        number: i32,
        elements: Vec<ElementSpec>,
    ) -> AppResult<Vec<MapElement>> {
        let elements = normalize_scene(elements)?;

        let mut tx = self.db.begin().await?;
        let warehouse = lock_warehouse(&mut tx, number).await?;
        let saved = replace_elements(&mut tx, warehouse.id, &elements).await?;
        tx.commit().await?;

        tracing::info!(
            number,
            elements = saved.len(),
            user_id = %actor.user_id,
            "Warehouse scene saved"
        );
        Ok(saved)
    }

    pub async fn export_json(&self, number: i32) -> AppResult<MapDocument> {
        let warehouse = self.get_warehouse(number).await?;
        let mut conn = self.db.acquire().await?;
        let elements = fetch_elements(&mut conn, warehouse.id).await?;
        Ok(MapDocument::export(&warehouse, &elements))
    }

    /// Full replacement keyed by warehouse number; unknown numbers are created
    pub async fn import_json(&self, actor: &Actor, document: MapDocument) -> AppResult<ImportResult> {
        let document = document.validated()?;
        let header = &document.warehouse;

        let mut tx = self.db.begin().await?;
        let existed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM warehouses WHERE number = $1)",
        )
        .bind(header.number)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, WarehouseRow>(&format!(
            r#"
            INSERT INTO warehouses (number, name, canvas_width, canvas_height, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (number) DO UPDATE SET
                name = EXCLUDED.name,
                canvas_width = EXCLUDED.canvas_width,
                canvas_height = EXCLUDED.canvas_height,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            WAREHOUSE_COLUMNS
        ))
        .bind(header.number)
        .bind(&header.name)
        .bind(header.canvas_width)
        .bind(header.canvas_height)
        .bind(actor.now)
        .fetch_one(&mut *tx)
        .await?;

        let elements = replace_elements(&mut tx, row.id, &document.elements).await?;
        tx.commit().await?;

        tracing::info!(
            number = header.number,
            elements = elements.len(),
            created = !existed,
            user_id = %actor.user_id,
            "Warehouse map imported"
        );
        Ok(ImportResult {
            warehouse: row.into(),
            elements,
            created: !existed,
        })
    }

    /// One layout per numeric `az` found in the ledger that has none yet
    pub async fn auto_create_warehouses(&self, actor: &Actor) -> AppResult<Vec<WarehouseLayout>> {
        let values = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT az FROM stocks WHERE az <> '' ORDER BY az",
        )
        .fetch_all(&self.db)
        .await?;

        let mut numbers: Vec<i32> = Vec::new();
        for az in &values {
            match parse_warehouse_number(az) {
                Some(number) => numbers.push(number),
                None => tracing::warn!(az = %az, "Skipping non-numeric warehouse code"),
            }
        }
        numbers.sort_unstable();
        numbers.dedup();

        let mut created = Vec::new();
        for number in numbers {
            let row = sqlx::query_as::<_, WarehouseRow>(&format!(
                r#"
                INSERT INTO warehouses (number, name, canvas_width, canvas_height)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (number) DO NOTHING
                RETURNING {}
                "#,
                WAREHOUSE_COLUMNS
            ))
            .bind(number)
            .bind(default_name(number))
            .bind(DEFAULT_CANVAS_WIDTH)
            .bind(DEFAULT_CANVAS_HEIGHT)
            .fetch_optional(&self.db)
            .await?;
            if let Some(row) = row {
                created.push(WarehouseLayout::from(row));
            }
        }

        tracing::info!(created = created.len(), user_id = %actor.user_id, "Warehouses auto-created");
        Ok(created)
    }

    /// Occupancy of every element whose identifier is a known ledger address
    pub async fn occupancy(&self, number: i32) -> AppResult<OccupancyResponse> {
        let elements = self.list_elements(number).await?;
        let addresses: Vec<String> = elements
            .iter()
            .filter_map(|e| e.spec.identifier.clone())
            .collect();

        let rows = sqlx::query_as::<_, AddressBalanceRow>(
            r#"
            SELECT address,
                   COALESCE(SUM(balance), 0)::BIGINT AS total_balance,
                   COUNT(*) FILTER (WHERE balance > 0) AS lot_count,
                   COALESCE(SUM(balance * unit_weight), 0) AS total_weight
            FROM stocks
            WHERE address = ANY($1)
            GROUP BY address
            "#,
        )
        .bind(&addresses)
        .fetch_all(&self.db)
        .await?;

        let snapshot: Vec<AddressBalance> = rows
            .into_iter()
            .map(|r| AddressBalance {
                address: r.address,
                total_balance: r.total_balance,
                lot_count: r.lot_count,
                total_weight: r.total_weight,
            })
            .collect();

        Ok(OccupancyResponse {
            warehouse_number: number,
            elements: resolve_occupancy(&elements, &snapshot),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_defaults() {
        assert_eq!(canvas_or_default(None, None).unwrap(), (1200, 800));
        assert_eq!(canvas_or_default(Some(300), None).unwrap(), (300, 800));
        assert!(canvas_or_default(Some(0), None).is_err());
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name(3), "Armazém 3");
    }

    #[test]
    fn test_element_row_conversion() {
        let row = ElementRow {
            id: Uuid::nil(),
            warehouse_id: Uuid::nil(),
            kind: "address_marker".into(),
            identifier: Some("P-01".into()),
            pos_x: 1.0,
            pos_y: 2.0,
            width: 3.0,
            height: 4.0,
            rotation: 90.0,
            z_order: 1,
            text_content: None,
            style: None,
        };
        let element = MapElement::try_from(row).unwrap();
        assert_eq!(element.spec.kind, ElementKind::AddressMarker);

        let bad = ElementRow {
            id: Uuid::nil(),
            warehouse_id: Uuid::nil(),
            kind: "window".into(),
            identifier: None,
            pos_x: 0.0,
            pos_y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            z_order: 0,
            text_content: None,
            style: None,
        };
        assert!(MapElement::try_from(bad).is_err());
    }

    #[test]
    fn test_create_input_validation() {
        let input = CreateWarehouseInput {
            number: 0,
            name: "Armazém".into(),
            canvas_width: None,
            canvas_height: None,
        };
        assert!(input.validate().is_err());
    }
}
