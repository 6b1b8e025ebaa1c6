//! Empenho engine: batched, two-phase ledger movements
//!
//! Drafts only run an advisory balance check. `confirm` and `execute` lock the
//! empenho and every source row (ascending id) and re-check feasibility, so a
//! stale draft can never push a balance below zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    check_feasibility, demand_by_source, validate_item_destination, validate_quantity, Actor,
    Empenho, EmpenhoAction, EmpenhoDetail, EmpenhoHeader, EmpenhoStatus, ItemEmpenho,
    MovementKind, PaginatedResponse, Pagination, Shortfall, SourceBalance,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::history::HistorySigner;
use crate::services::ledger::{self, lock_stock};

const MAX_PER_PAGE: u32 = 100;

/// Empenho service
#[derive(Clone)]
pub struct EmpenhoService {
    db: PgPool,
    signer: HistorySigner,
}

// ============================================================================
// Inputs
// ============================================================================

/// Input for creating a draft
#[derive(Debug, Deserialize)]
pub struct CreateEmpenhoInput {
    pub movement_type: MovementKind,
    #[serde(flatten)]
    pub header: EmpenhoHeader,
}

/// Input for adding an item
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub source_stock_id: Uuid,
    pub quantity: i64,
    pub destination_address: Option<String>,
    pub observation: Option<String>,
}

/// Input for editing an item; absent fields are unchanged
#[derive(Debug, Deserialize)]
pub struct EditItemInput {
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub destination_address: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::double_option")]
    pub observation: Option<Option<String>>,
}

/// Empenho listing filters
#[derive(Debug, Default, Deserialize)]
pub struct EmpenhoQuery {
    pub status: Option<EmpenhoStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Result of a successful execution
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    #[serde(flatten)]
    pub empenho: EmpenhoDetail,
    pub affected_stock_ids: Vec<Uuid>,
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct EmpenhoRow {
    id: Uuid,
    user_id: Uuid,
    movement_type: String,
    status: String,
    observation: String,
    load_number: String,
    driver: String,
    plate: String,
    client: String,
    delivery_order: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    executed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<EmpenhoRow> for Empenho {
    type Error = AppError;

    fn try_from(row: EmpenhoRow) -> Result<Self, Self::Error> {
        let movement_type = MovementKind::parse(&row.movement_type).ok_or_else(|| {
            AppError::Internal(format!("unknown movement type {}", row.movement_type))
        })?;
        let status = EmpenhoStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unknown status {}", row.status)))?;
        Ok(Empenho {
            id: row.id,
            user_id: row.user_id,
            movement_type,
            status,
            header: EmpenhoHeader {
                observation: row.observation,
                load_number: row.load_number,
                driver: row.driver,
                plate: row.plate,
                client: row.client,
                delivery_order: row.delivery_order,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
            confirmed_at: row.confirmed_at,
            executed_at: row.executed_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    seq: i64,
    empenho_id: Uuid,
    source_stock_id: Option<Uuid>,
    lot_ref: String,
    source_address: String,
    quantity: i64,
    destination_address: Option<String>,
    observation: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ItemRow> for ItemEmpenho {
    fn from(row: ItemRow) -> Self {
        ItemEmpenho {
            id: row.id,
            seq: row.seq,
            empenho_id: row.empenho_id,
            source_stock_id: row.source_stock_id,
            lot_ref: row.lot_ref,
            source_address: row.source_address,
            quantity: row.quantity,
            destination_address: row.destination_address,
            observation: row.observation,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: Uuid,
    lot: String,
    address: String,
    balance: i64,
}

const EMPENHO_COLUMNS: &str = r#"
    id, user_id, movement_type, status, observation, load_number, driver, plate, client,
    delivery_order, created_at, updated_at, confirmed_at, executed_at, cancelled_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, seq, empenho_id, source_stock_id, lot_ref, source_address, quantity,
    destination_address, observation, created_at
"#;

fn trimmed_opt(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

// ============================================================================
// Transactional helpers
// ============================================================================

/// Lock the empenho row and check the caller may act on it
async fn lock_owned(conn: &mut PgConnection, actor: &Actor, empenho_id: Uuid) -> AppResult<Empenho> {
    let row = sqlx::query_as::<_, EmpenhoRow>(&format!(
        "SELECT {} FROM empenhos WHERE id = $1 FOR UPDATE",
        EMPENHO_COLUMNS
    ))
    .bind(empenho_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Empenho".to_string()))?;

    let empenho = Empenho::try_from(row)?;
    if !actor.can_act_for(empenho.user_id) {
        return Err(AppError::AuthorizationDenied(
            "only the owner or an administrator may change this empenho".to_string(),
        ));
    }
    Ok(empenho)
}

async fn load_items(conn: &mut PgConnection, empenho_id: Uuid) -> AppResult<Vec<ItemEmpenho>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {} FROM item_empenhos WHERE empenho_id = $1 ORDER BY seq",
        ITEM_COLUMNS
    ))
    .bind(empenho_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(ItemEmpenho::from).collect())
}

/// Lock the given stock rows in ascending id order and read their balances
async fn lock_sources(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> AppResult<HashMap<Uuid, SourceBalance>> {
    let rows = sqlx::query_as::<_, SourceRow>(
        "SELECT id, lot, address, balance FROM stocks WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            (
                r.id,
                SourceBalance {
                    stock_id: r.id,
                    lot: r.lot,
                    address: r.address,
                    balance: r.balance,
                },
            )
        })
        .collect())
}

/// Structural and balance checks shared by confirm and execute
async fn check_items(
    conn: &mut PgConnection,
    kind: MovementKind,
    items: &[ItemEmpenho],
) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::validation("items", "An empenho needs at least one item"));
    }

    let mut sources = Vec::with_capacity(items.len());
    for item in items {
        let source_id = item.source_stock_id.ok_or_else(|| AppError::Validation {
            field: "items".to_string(),
            message: format!("The source of lot {} no longer exists", item.lot_ref),
            message_pt: format!("A origem do lote {} não existe mais", item.lot_ref),
        })?;
        validate_item_destination(kind, &item.source_address, item.destination_address.as_deref())?;
        sources.push((source_id, item.quantity));
    }

    let demand = demand_by_source(sources);
    let ids: Vec<Uuid> = demand.keys().copied().collect();
    let balances = lock_sources(conn, &ids).await?;
    if balances.len() != ids.len() {
        return Err(AppError::NotFound("Stock".to_string()));
    }
    if kind.consumes_balance() {
        check_feasibility(&demand, &balances)?;
    }
    Ok(())
}

/// Advisory draft check: this empenho's total for the source must fit its balance
async fn check_draft_balance(
    conn: &mut PgConnection,
    empenho_id: Uuid,
    source: &shared::Stock,
    quantity: i64,
    excluding_item: Option<Uuid>,
) -> AppResult<()> {
    let drafted = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM item_empenhos
        WHERE empenho_id = $1 AND source_stock_id = $2
          AND ($3::uuid IS NULL OR id <> $3)
        "#,
    )
    .bind(empenho_id)
    .bind(source.id)
    .bind(excluding_item)
    .fetch_one(&mut *conn)
    .await?;

    let requested = drafted.saturating_add(quantity);
    if requested > source.balance() {
        return Err(AppError::InsufficientBalance {
            shortfalls: vec![Shortfall {
                stock_id: source.id,
                lot: source.attributes.lot.clone(),
                address: source.address.clone(),
                requested,
                available: source.balance(),
            }],
        });
    }
    Ok(())
}

async fn touch(conn: &mut PgConnection, empenho_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE empenhos SET updated_at = $2 WHERE id = $1")
        .bind(empenho_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_status(
    conn: &mut PgConnection,
    empenho_id: Uuid,
    status: EmpenhoStatus,
    now: DateTime<Utc>,
) -> AppResult<Empenho> {
    let stamp_column = match status {
        EmpenhoStatus::Confirmed => "confirmed_at",
        EmpenhoStatus::Executed => "executed_at",
        EmpenhoStatus::Cancelled => "cancelled_at",
        EmpenhoStatus::Draft => "updated_at",
    };
    let row = sqlx::query_as::<_, EmpenhoRow>(&format!(
        "UPDATE empenhos SET status = $2, {} = $3, updated_at = $3 WHERE id = $1 RETURNING {}",
        stamp_column, EMPENHO_COLUMNS
    ))
    .bind(empenho_id)
    .bind(status.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Empenho::try_from(row)
}

// ============================================================================
// Service
// ============================================================================

impl EmpenhoService {
    pub fn new(db: PgPool, signer: HistorySigner) -> Self {
        Self { db, signer }
    }

    /// Start a new draft owned by the caller
    pub async fn create_draft(&self, actor: &Actor, input: CreateEmpenhoInput) -> AppResult<Empenho> {
        let header = input.header.trimmed();
        let row = sqlx::query_as::<_, EmpenhoRow>(&format!(
            r#"
            INSERT INTO empenhos (
                user_id, movement_type, observation, load_number, driver, plate, client,
                delivery_order, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {}
            "#,
            EMPENHO_COLUMNS
        ))
        .bind(actor.user_id)
        .bind(input.movement_type.as_str())
        .bind(&header.observation)
        .bind(&header.load_number)
        .bind(&header.driver)
        .bind(&header.plate)
        .bind(&header.client)
        .bind(&header.delivery_order)
        .bind(actor.now)
        .fetch_one(&self.db)
        .await?;

        let empenho = Empenho::try_from(row)?;
        tracing::info!(
            empenho_id = %empenho.id,
            movement_type = input.movement_type.as_str(),
            user_id = %actor.user_id,
            "Empenho draft created"
        );
        Ok(empenho)
    }

    /// Replace the header of a draft
    pub async fn update_header(
        &self,
        actor: &Actor,
        empenho_id: Uuid,
        header: EmpenhoHeader,
    ) -> AppResult<Empenho> {
        let header = header.trimmed();
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        empenho.status.apply(EmpenhoAction::Edit)?;

        let row = sqlx::query_as::<_, EmpenhoRow>(&format!(
            r#"
            UPDATE empenhos SET
                observation = $2, load_number = $3, driver = $4, plate = $5, client = $6,
                delivery_order = $7, updated_at = $8
            WHERE id = $1
            RETURNING {}
            "#,
            EMPENHO_COLUMNS
        ))
        .bind(empenho_id)
        .bind(&header.observation)
        .bind(&header.load_number)
        .bind(&header.driver)
        .bind(&header.plate)
        .bind(&header.client)
        .bind(&header.delivery_order)
        .bind(actor.now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Empenho::try_from(row)
    }

    /// Header and items
    pub async fn get(&self, actor: &Actor, empenho_id: Uuid) -> AppResult<EmpenhoDetail> {
        let mut conn = self.db.acquire().await?;
        let row = sqlx::query_as::<_, EmpenhoRow>(&format!(
            "SELECT {} FROM empenhos WHERE id = $1",
            EMPENHO_COLUMNS
        ))
        .bind(empenho_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Empenho".to_string()))?;

        let empenho = Empenho::try_from(row)?;
        if !actor.can_act_for(empenho.user_id) {
            return Err(AppError::AuthorizationDenied(
                "only the owner or an administrator may view this empenho".to_string(),
            ));
        }
        let items = load_items(&mut conn, empenho_id).await?;
        Ok(EmpenhoDetail { empenho, items })
    }

    /// The caller's empenhos, or all of them for an admin; newest first
    pub async fn list(
        &self,
        actor: &Actor,
        query: EmpenhoQuery,
    ) -> AppResult<PaginatedResponse<Empenho>> {
        let pagination = Pagination::from_query(query.page, query.per_page, MAX_PER_PAGE);
        let owner = (!actor.is_admin).then_some(actor.user_id);
        let status = query.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM empenhos
            WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(owner)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, EmpenhoRow>(&format!(
            r#"
            SELECT {} FROM empenhos
            WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
            EMPENHO_COLUMNS
        ))
        .bind(owner)
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let empenhos = rows
            .into_iter()
            .map(Empenho::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(PaginatedResponse::new(empenhos, &pagination, total as u64))
    }

    /// Add a line to a draft
    pub async fn add_item(
        &self,
        actor: &Actor,
        empenho_id: Uuid,
        input: AddItemInput,
    ) -> AppResult<ItemEmpenho> {
        validate_quantity(input.quantity).map_err(|m| AppError::validation("quantity", m))?;

        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        empenho.status.apply(EmpenhoAction::Edit)?;

        // Locked so the advisory check reads a balance no one is changing
        let source = lock_stock(&mut tx, input.source_stock_id).await?;
        let destination = validate_item_destination(
            empenho.movement_type,
            &source.address,
            input.destination_address.as_deref(),
        )?;
        if empenho.movement_type.consumes_balance() {
            check_draft_balance(&mut tx, empenho_id, &source, input.quantity, None).await?;
        }

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            INSERT INTO item_empenhos (
                empenho_id, source_stock_id, lot_ref, source_address, quantity,
                destination_address, observation, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(empenho_id)
        .bind(source.id)
        .bind(&source.attributes.lot)
        .bind(&source.address)
        .bind(input.quantity)
        .bind(&destination)
        .bind(trimmed_opt(input.observation.as_deref()))
        .bind(actor.now)
        .fetch_one(&mut *tx)
        .await?;
        touch(&mut tx, empenho_id, actor.now).await?;
        tx.commit().await?;

        tracing::info!(
            empenho_id = %empenho_id,
            stock_id = %source.id,
            quantity = input.quantity,
            "Empenho item added"
        );
        Ok(row.into())
    }

    /// Change the quantity, destination or observation of a draft line
    pub async fn edit_item(
        &self,
        actor: &Actor,
        empenho_id: Uuid,
        item_id: Uuid,
        input: EditItemInput,
    ) -> AppResult<ItemEmpenho> {
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        empenho.status.apply(EmpenhoAction::Edit)?;

        let item: ItemEmpenho = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM item_empenhos WHERE id = $1 AND empenho_id = $2",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(empenho_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Empenho item".to_string()))?
        .into();

        let source_id = item.source_stock_id.ok_or_else(|| {
            AppError::validation("source_stock_id", "The source lot of this item no longer exists")
        })?;
        let source = lock_stock(&mut tx, source_id).await?;

        let quantity = input.quantity.unwrap_or(item.quantity);
        validate_quantity(quantity).map_err(|m| AppError::validation("quantity", m))?;
        let destination = match &input.destination_address {
            Some(value) => value.clone(),
            None => item.destination_address.clone(),
        };
        let destination = validate_item_destination(
            empenho.movement_type,
            &source.address,
            destination.as_deref(),
        )?;
        let observation = match &input.observation {
            Some(value) => trimmed_opt(value.as_deref()),
            None => item.observation.clone(),
        };
        if empenho.movement_type.consumes_balance() {
            check_draft_balance(&mut tx, empenho_id, &source, quantity, Some(item_id)).await?;
        }

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            UPDATE item_empenhos SET quantity = $2, destination_address = $3, observation = $4
            WHERE id = $1
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(quantity)
        .bind(&destination)
        .bind(&observation)
        .fetch_one(&mut *tx)
        .await?;
        touch(&mut tx, empenho_id, actor.now).await?;
        tx.commit().await?;

        Ok(row.into())
    }

    /// Drop a line from a draft
    pub async fn remove_item(&self, actor: &Actor, empenho_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        empenho.status.apply(EmpenhoAction::Edit)?;

        let removed = sqlx::query("DELETE FROM item_empenhos WHERE id = $1 AND empenho_id = $2")
            .bind(item_id)
            .bind(empenho_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(AppError::NotFound("Empenho item".to_string()));
        }
        touch(&mut tx, empenho_id, actor.now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// DRAFT → CONFIRMED once every line is feasible
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn confirm(&self, actor: &Actor, empenho_id: Uuid) -> AppResult<EmpenhoDetail> {
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        let next = empenho.status.apply(EmpenhoAction::Confirm)?;

        let items = load_items(&mut tx, empenho_id).await?;
        check_items(&mut tx, empenho.movement_type, &items).await?;

        let empenho = set_status(&mut tx, empenho_id, next, actor.now).await?;
        tx.commit().await?;

        tracing::info!(empenho_id = %empenho_id, items = items.len(), "Empenho confirmed");
        Ok(EmpenhoDetail { empenho, items })
    }

    /// CONFIRMED → EXECUTED, applying every line in order in one transaction
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn execute(&self, actor: &Actor, empenho_id: Uuid) -> AppResult<ExecutionReport> {
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        let next = empenho.status.apply(EmpenhoAction::Execute)?;

        let items = load_items(&mut tx, empenho_id).await?;
        check_items(&mut tx, empenho.movement_type, &items).await?;

        let tag = Some(empenho_id);
        let mut affected = Vec::new();
        for item in &items {
            // check_items guarantees a source on every line
            let source_id = item
                .source_stock_id
                .ok_or_else(|| AppError::NotFound("Stock".to_string()))?;
            match empenho.movement_type {
                MovementKind::Transfer => {
                    let destination = item.destination_address.as_deref().ok_or_else(|| {
                        AppError::validation("destination_address", "Transfer items need a destination")
                    })?;
                    let (source, dest) = ledger::transfer_in(
                        &mut tx,
                        &self.signer,
                        actor,
                        source_id,
                        item.quantity,
                        destination,
                        tag,
                    )
                    .await?;
                    affected.extend([source.id, dest.id]);
                }
                MovementKind::Exit => {
                    let reason = item.observation.as_deref().or_else(|| {
                        Some(empenho.header.observation.as_str()).filter(|s| !s.is_empty())
                    });
                    let source = ledger::exit_in(
                        &mut tx,
                        &self.signer,
                        actor,
                        source_id,
                        item.quantity,
                        reason,
                        tag,
                    )
                    .await?;
                    affected.push(source.id);
                }
                MovementKind::EntryBulk => {
                    let source = lock_stock(&mut tx, source_id).await?;
                    let address = item
                        .destination_address
                        .clone()
                        .unwrap_or_else(|| source.address.clone());
                    let stock = ledger::entry_in(
                        &mut tx,
                        &self.signer,
                        actor,
                        &source.attributes,
                        &address,
                        item.quantity,
                        true,
                        tag,
                    )
                    .await?;
                    affected.push(stock.id);
                }
            }
        }

        // Last write of the transaction
        let empenho = set_status(&mut tx, empenho_id, next, actor.now).await?;
        tx.commit().await?;

        affected.sort();
        affected.dedup();
        tracing::info!(
            empenho_id = %empenho_id,
            items = items.len(),
            stocks = affected.len(),
            "Empenho executed"
        );
        Ok(ExecutionReport {
            empenho: EmpenhoDetail { empenho, items },
            affected_stock_ids: affected,
        })
    }

    /// DRAFT or CONFIRMED → CANCELLED; the ledger is untouched
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn cancel(&self, actor: &Actor, empenho_id: Uuid) -> AppResult<Empenho> {
        let mut tx = self.db.begin().await?;
        let empenho = lock_owned(&mut tx, actor, empenho_id).await?;
        let next = empenho.status.apply(EmpenhoAction::Cancel)?;
        let empenho = set_status(&mut tx, empenho_id, next, actor.now).await?;
        tx.commit().await?;

        tracing::info!(empenho_id = %empenho_id, "Empenho cancelled");
        Ok(empenho)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_item_input_tristate() {
        let input: EditItemInput =
            serde_json::from_value(serde_json::json!({ "destination_address": null })).unwrap();
        assert_eq!(input.destination_address, Some(None));
        assert_eq!(input.observation, None);
        assert_eq!(input.quantity, None);
    }

    #[test]
    fn test_create_input_flattens_header() {
        let input: CreateEmpenhoInput = serde_json::from_value(serde_json::json!({
            "movement_type": "EXIT",
            "driver": "João",
            "plate": "ABC1D23"
        }))
        .unwrap();
        assert_eq!(input.movement_type, MovementKind::Exit);
        assert_eq!(input.header.driver, "João");
        assert_eq!(input.header.load_number, "");
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let now = Utc::now();
        let row = EmpenhoRow {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            movement_type: "TRANSFER".into(),
            status: "ARCHIVED".into(),
            observation: String::new(),
            load_number: String::new(),
            driver: String::new(),
            plate: String::new(),
            client: String::new(),
            delivery_order: String::new(),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            executed_at: None,
            cancelled_at: None,
        };
        assert!(Empenho::try_from(row).is_err());
    }
}
