//! Lot ledger service
//!
//! All quantity changes go through the `*_in` functions, which take an open
//! connection so that a single empenho execution can chain many of them in
//! one transaction. Every row they touch is locked with `FOR UPDATE` first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    check_merge_key_change, describe, describe_changes, ensure_stock_deletable,
    normalize_address, normalize_lot, Actor, EmpenhoStatus, EntryInput, MergeKey, MovementType,
    Packaging, PaginatedResponse, Pagination, Stock, StockAttributes, StockEdit, StockNames,
    StockSnapshot, StockTotals, StockView, TaxonomyKind,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::history::{self, HistorySigner, NewMovement};
use crate::services::settings::ConfigurationService;

/// Largest page a client may request from the stock list
const MAX_PER_PAGE: u32 = 200;

/// Lot ledger service
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
    signer: HistorySigner,
}

// ============================================================================
// Rows
// ============================================================================

/// Database row for a stock
#[derive(Debug, FromRow)]
pub(crate) struct StockRow {
    id: Uuid,
    lot: String,
    product: String,
    cultivar_id: Uuid,
    screen_id: Uuid,
    category_id: Uuid,
    treatment_id: Option<Uuid>,
    species_id: Option<Uuid>,
    address: String,
    entries: i64,
    exits: i64,
    packaging: String,
    unit_weight: Decimal,
    company: String,
    origin_destination: String,
    az: String,
    client: String,
    observation: Option<String>,
    operator_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StockRow> for Stock {
    type Error = AppError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        let packaging = Packaging::parse(&row.packaging)
            .ok_or_else(|| AppError::Internal(format!("unknown packaging {}", row.packaging)))?;
        Ok(Stock {
            id: row.id,
            address: row.address,
            attributes: StockAttributes {
                lot: row.lot,
                product: row.product,
                cultivar_id: row.cultivar_id,
                screen_id: row.screen_id,
                category_id: row.category_id,
                treatment_id: row.treatment_id,
                species_id: row.species_id,
                packaging,
                unit_weight: row.unit_weight,
                company: row.company,
                origin_destination: row.origin_destination,
                az: row.az,
                client: row.client,
                observation: row.observation,
            },
            entries: row.entries,
            exits: row.exits,
            operator_id: row.operator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stock row joined with the names it references
#[derive(Debug, FromRow)]
pub(crate) struct StockViewRow {
    #[sqlx(flatten)]
    stock: StockRow,
    cultivar_name: String,
    screen_name: String,
    category_name: String,
    treatment_name: Option<String>,
    species_name: Option<String>,
    operator_name: Option<String>,
}

impl TryFrom<StockViewRow> for StockView {
    type Error = AppError;

    fn try_from(row: StockViewRow) -> Result<Self, Self::Error> {
        let names = StockNames {
            cultivar: row.cultivar_name,
            screen: row.screen_name,
            category: row.category_name,
            treatment: row.treatment_name,
            species: row.species_name,
            operator: row.operator_name,
        };
        Ok(StockView::new(Stock::try_from(row.stock)?, names))
    }
}

pub(crate) const STOCK_COLUMNS: &str = r#"
    s.id, s.lot, s.product, s.cultivar_id, s.screen_id, s.category_id, s.treatment_id,
    s.species_id, s.address, s.entries, s.exits, s.packaging, s.unit_weight, s.company,
    s.origin_destination, s.az, s.client, s.observation, s.operator_id, s.created_at,
    s.updated_at
"#;

pub(crate) fn stock_view_select() -> String {
    format!(
        r#"
        SELECT {},
               c.name AS cultivar_name, sc.name AS screen_name, cat.name AS category_name,
               t.name AS treatment_name, sp.name AS species_name, u.username AS operator_name
        FROM stocks s
        JOIN cultivars c ON c.id = s.cultivar_id
        JOIN screens sc ON sc.id = s.screen_id
        JOIN categories cat ON cat.id = s.category_id
        LEFT JOIN treatments t ON t.id = s.treatment_id
        LEFT JOIN species sp ON sp.id = s.species_id
        LEFT JOIN users u ON u.id = s.operator_id
        "#,
        STOCK_COLUMNS
    )
}

pub(crate) fn into_views(rows: Vec<StockViewRow>) -> AppResult<Vec<StockView>> {
    rows.into_iter().map(StockView::try_from).collect()
}

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Input for a transfer
#[derive(Debug, Deserialize)]
pub struct TransferInput {
    pub quantity: i64,
    pub new_address: String,
}

/// Input for an exit
#[derive(Debug, Deserialize)]
pub struct ExitInput {
    pub quantity: i64,
    pub reason: Option<String>,
}

/// Both sides of a transfer
#[derive(Debug, Serialize)]
pub struct TransferResult {
    pub source: StockView,
    pub destination: StockView,
}

/// Stock list filters
#[derive(Debug, Default, Deserialize)]
pub struct StockQuery {
    pub search: Option<String>,
    pub lot_prefix: Option<String>,
    pub address: Option<String>,
    pub cultivar_id: Option<Uuid>,
    #[serde(default)]
    pub only_available: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// One page of stock with totals over the whole filtered set
#[derive(Debug, Serialize)]
pub struct StockListResponse {
    #[serde(flatten)]
    pub page: PaginatedResponse<StockView>,
    pub totals: StockTotals,
}

/// What is stored at one address
#[derive(Debug, Serialize)]
pub struct AddressStock {
    pub address: String,
    pub has_stock: bool,
    pub total_balance: i64,
    pub lots: Vec<StockView>,
}

#[derive(Debug, FromRow)]
struct TotalsRow {
    total: i64,
    total_bag: i64,
    total_sc: i64,
}

/// Escape LIKE wildcards in operator input
fn like_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// Transactional building blocks
// ============================================================================

/// Load one stock row without locking it
async fn load_stock(conn: &mut PgConnection, stock_id: Uuid) -> AppResult<Stock> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        "SELECT {} FROM stocks s WHERE s.id = $1",
        STOCK_COLUMNS
    ))
    .bind(stock_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Stock".to_string()))?;

    Stock::try_from(row)
}

/// Load and lock one stock row
pub(crate) async fn lock_stock(conn: &mut PgConnection, stock_id: Uuid) -> AppResult<Stock> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        "SELECT {} FROM stocks s WHERE s.id = $1 FOR UPDATE",
        STOCK_COLUMNS
    ))
    .bind(stock_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Stock".to_string()))?;

    Stock::try_from(row)
}

/// Ids to lock for a set of rows: ascending and without repeats
pub(crate) fn lock_order<I>(ids: I) -> Vec<Uuid>
where
    I: IntoIterator<Item = Uuid>,
{
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Lock several stock rows in ascending id order
async fn lock_in_id_order(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM stocks WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(())
}

async fn find_by_merge_key(conn: &mut PgConnection, key: &MergeKey) -> AppResult<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT s.id FROM stocks s
        WHERE s.lot = $1 AND s.address = $2 AND s.cultivar_id = $3 AND s.screen_id = $4
          AND s.category_id = $5 AND s.treatment_id IS NOT DISTINCT FROM $6
          AND s.packaging = $7 AND s.company = $8
        "#,
    )
    .bind(&key.lot)
    .bind(&key.address)
    .bind(key.cultivar_id)
    .bind(key.screen_id)
    .bind(key.category_id)
    .bind(key.treatment_id)
    .bind(key.packaging.as_str())
    .bind(&key.company)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

async fn lock_by_merge_key(conn: &mut PgConnection, key: &MergeKey) -> AppResult<Option<Stock>> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        r#"
        SELECT {} FROM stocks s
        WHERE s.lot = $1 AND s.address = $2 AND s.cultivar_id = $3 AND s.screen_id = $4
          AND s.category_id = $5 AND s.treatment_id IS NOT DISTINCT FROM $6
          AND s.packaging = $7 AND s.company = $8
        FOR UPDATE
        "#,
        STOCK_COLUMNS
    ))
    .bind(&key.lot)
    .bind(&key.address)
    .bind(key.cultivar_id)
    .bind(key.screen_id)
    .bind(key.category_id)
    .bind(key.treatment_id)
    .bind(key.packaging.as_str())
    .bind(&key.company)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Stock::try_from).transpose()
}

async fn insert_stock(
    conn: &mut PgConnection,
    attributes: &StockAttributes,
    address: &str,
    entries: i64,
    actor: &Actor,
) -> AppResult<Stock> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        r#"
        INSERT INTO stocks AS s (
            lot, product, cultivar_id, screen_id, category_id, treatment_id, species_id,
            address, entries, exits, packaging, unit_weight, company, origin_destination,
            az, client, observation, operator_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
        RETURNING {}
        "#,
        STOCK_COLUMNS
    ))
    .bind(&attributes.lot)
    .bind(&attributes.product)
    .bind(attributes.cultivar_id)
    .bind(attributes.screen_id)
    .bind(attributes.category_id)
    .bind(attributes.treatment_id)
    .bind(attributes.species_id)
    .bind(address)
    .bind(entries)
    .bind(attributes.packaging.as_str())
    .bind(attributes.unit_weight)
    .bind(&attributes.company)
    .bind(&attributes.origin_destination)
    .bind(&attributes.az)
    .bind(&attributes.client)
    .bind(&attributes.observation)
    .bind(actor.user_id)
    .bind(actor.now)
    .fetch_one(&mut *conn)
    .await?;

    Stock::try_from(row)
}

async fn add_entries(
    conn: &mut PgConnection,
    stock_id: Uuid,
    quantity: i64,
    now: DateTime<Utc>,
) -> AppResult<Stock> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        "UPDATE stocks AS s SET entries = entries + $2, updated_at = $3 WHERE s.id = $1 RETURNING {}",
        STOCK_COLUMNS
    ))
    .bind(stock_id)
    .bind(quantity)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Stock::try_from(row)
}

async fn add_exits(
    conn: &mut PgConnection,
    stock_id: Uuid,
    quantity: i64,
    now: DateTime<Utc>,
) -> AppResult<Stock> {
    let row = sqlx::query_as::<_, StockRow>(&format!(
        "UPDATE stocks AS s SET exits = exits + $2, updated_at = $3 WHERE s.id = $1 RETURNING {}",
        STOCK_COLUMNS
    ))
    .bind(stock_id)
    .bind(quantity)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Stock::try_from(row)
}

/// Check that every taxonomy id exists
pub(crate) async fn ensure_references(
    conn: &mut PgConnection,
    references: &[(TaxonomyKind, Uuid)],
) -> AppResult<()> {
    for (kind, id) in references {
        let exists = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            kind.table()
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        if !exists {
            return Err(AppError::Validation {
                field: kind.reference_column().to_string(),
                message: format!("Unknown {}", kind.as_str()),
                message_pt: format!("{} não cadastrado(a)", kind.label_pt()),
            });
        }
    }
    Ok(())
}

fn attribute_references(attributes: &StockAttributes) -> Vec<(TaxonomyKind, Uuid)> {
    let mut refs = vec![
        (TaxonomyKind::Cultivar, attributes.cultivar_id),
        (TaxonomyKind::Screen, attributes.screen_id),
        (TaxonomyKind::Category, attributes.category_id),
    ];
    refs.extend(attributes.treatment_id.map(|id| (TaxonomyKind::Treatment, id)));
    refs.extend(attributes.species_id.map(|id| (TaxonomyKind::Species, id)));
    refs
}

/// Receive units at an address, merging into the row with the same key
///
/// Without `allow_split`, creating a second row for a lot, address and
/// cultivar that already exist with other sub-attributes is refused.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn entry_in(
    conn: &mut PgConnection,
    signer: &HistorySigner,
    actor: &Actor,
    attributes: &StockAttributes,
    address: &str,
    quantity: i64,
    allow_split: bool,
    empenho_id: Option<Uuid>,
) -> AppResult<Stock> {
    shared::validate_quantity(quantity).map_err(|m| AppError::validation("entries", m))?;
    let key = attributes.merge_key(address);

    if let Some(mut existing) = lock_by_merge_key(conn, &key).await? {
        existing.receive(quantity)?;
        let stock = add_entries(conn, existing.id, quantity, actor.now).await?;
        history::append(
            conn,
            signer,
            actor,
            NewMovement {
                stock_id: Some(stock.id),
                lot_ref: &stock.attributes.lot,
                movement_type: MovementType::EntrySum.tagged(empenho_id),
                quantity: Some(quantity),
                description: describe::entry_sum(quantity, stock.balance(), empenho_id),
                empenho_id,
            },
        )
        .await?;
        return Ok(stock);
    }

    if !allow_split {
        let sibling = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM stocks WHERE lot = $1 AND address = $2 AND cultivar_id = $3
            )
            "#,
        )
        .bind(&key.lot)
        .bind(&key.address)
        .bind(key.cultivar_id)
        .fetch_one(&mut *conn)
        .await?;
        if sibling {
            return Err(AppError::Validation {
                field: "allow_split".to_string(),
                message: "This lot already exists at this address with other attributes; confirm to create a separate row".to_string(),
                message_pt: "Este lote já existe neste endereço com outros atributos; confirme para criar um registro separado".to_string(),
            });
        }
    }

    let stock = insert_stock(conn, attributes, address, quantity, actor).await?;
    history::append(
        conn,
        signer,
        actor,
        NewMovement {
            stock_id: Some(stock.id),
            lot_ref: &stock.attributes.lot,
            movement_type: MovementType::EntryInitial.tagged(empenho_id),
            quantity: Some(quantity),
            description: describe::entry_initial(quantity, address, empenho_id),
            empenho_id,
        },
    )
    .await?;
    Ok(stock)
}

/// Move units from one row to another address; returns `(source, destination)`
pub(crate) async fn transfer_in(
    conn: &mut PgConnection,
    signer: &HistorySigner,
    actor: &Actor,
    source_id: Uuid,
    quantity: i64,
    new_address: &str,
    empenho_id: Option<Uuid>,
) -> AppResult<(Stock, Stock)> {
    let new_address =
        normalize_address(new_address).map_err(|m| AppError::validation("new_address", m))?;

    // Both rows are locked in id order so crossed transfers cannot deadlock
    let source = load_stock(conn, source_id).await?;
    let destination_id =
        find_by_merge_key(conn, &source.merge_key().at_address(&new_address)).await?;
    lock_in_id_order(conn, &lock_order([source_id].into_iter().chain(destination_id))).await?;

    let source = lock_stock(conn, source_id).await?;
    if new_address == source.address {
        return Err(AppError::validation(
            "new_address",
            "Destination must differ from the source address",
        ));
    }
    source.ensure_available(quantity)?;

    let source = add_exits(conn, source.id, quantity, actor.now).await?;
    history::append(
        conn,
        signer,
        actor,
        NewMovement {
            stock_id: Some(source.id),
            lot_ref: &source.attributes.lot,
            movement_type: MovementType::TransferOut.tagged(empenho_id),
            quantity: Some(quantity),
            description: describe::transfer_out(quantity, &new_address, empenho_id),
            empenho_id,
        },
    )
    .await?;

    let key = source.merge_key().at_address(&new_address);
    let (destination, movement_type) = match lock_by_merge_key(conn, &key).await? {
        Some(mut existing) => {
            existing.receive(quantity)?;
            (
                add_entries(conn, existing.id, quantity, actor.now).await?,
                MovementType::TransferInSum,
            )
        }
        None => {
            let mut attributes = source.attributes.clone();
            attributes.origin_destination = format!("Transf. de {}", source.address);
            (
                insert_stock(conn, &attributes, &new_address, quantity, actor).await?,
                MovementType::TransferIn,
            )
        }
    };
    history::append(
        conn,
        signer,
        actor,
        NewMovement {
            stock_id: Some(destination.id),
            lot_ref: &destination.attributes.lot,
            movement_type: movement_type.tagged(empenho_id),
            quantity: Some(quantity),
            description: describe::transfer_in(quantity, &source.address, empenho_id),
            empenho_id,
        },
    )
    .await?;

    Ok((source, destination))
}

/// Take units out of the ledger
pub(crate) async fn exit_in(
    conn: &mut PgConnection,
    signer: &HistorySigner,
    actor: &Actor,
    source_id: Uuid,
    quantity: i64,
    reason: Option<&str>,
    empenho_id: Option<Uuid>,
) -> AppResult<Stock> {
    let source = lock_stock(conn, source_id).await?;
    source.ensure_available(quantity)?;

    let stock = add_exits(conn, source.id, quantity, actor.now).await?;
    history::append(
        conn,
        signer,
        actor,
        NewMovement {
            stock_id: Some(stock.id),
            lot_ref: &stock.attributes.lot,
            movement_type: MovementType::Exit.tagged(empenho_id),
            quantity: Some(quantity),
            description: describe::exit(quantity, reason, empenho_id),
            empenho_id,
        },
    )
    .await?;
    Ok(stock)
}

async fn load_view(conn: &mut PgConnection, stock_id: Uuid) -> AppResult<StockView> {
    let row = sqlx::query_as::<_, StockViewRow>(&format!(
        "{} WHERE s.id = $1",
        stock_view_select()
    ))
    .bind(stock_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Stock".to_string()))?;

    StockView::try_from(row)
}

// ============================================================================
// Service
// ============================================================================

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool, signer: HistorySigner) -> Self {
        Self { db, signer }
    }

    /// Register an entry
    #[tracing::instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn create_entry(&self, actor: &Actor, input: EntryInput) -> AppResult<StockView> {
        let (attributes, address) = input.normalized()?;

        let mut tx = self.db.begin().await?;
        ensure_references(&mut tx, &attribute_references(&attributes)).await?;
        let stock = entry_in(
            &mut tx,
            &self.signer,
            actor,
            &attributes,
            &address,
            input.entries,
            input.allow_split,
            None,
        )
        .await?;
        let view = load_view(&mut tx, stock.id).await?;
        tx.commit().await?;

        tracing::info!(
            stock_id = %stock.id,
            lot = %stock.attributes.lot,
            address = %stock.address,
            quantity = input.entries,
            "Entry registered"
        );
        Ok(view)
    }

    /// Transfer units to another address
    #[tracing::instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn transfer(
        &self,
        actor: &Actor,
        stock_id: Uuid,
        input: TransferInput,
    ) -> AppResult<TransferResult> {
        let mut tx = self.db.begin().await?;
        let (source, destination) = transfer_in(
            &mut tx,
            &self.signer,
            actor,
            stock_id,
            input.quantity,
            &input.new_address,
            None,
        )
        .await?;
        let result = TransferResult {
            source: load_view(&mut tx, source.id).await?,
            destination: load_view(&mut tx, destination.id).await?,
        };
        tx.commit().await?;

        tracing::info!(
            stock_id = %source.id,
            destination_id = %destination.id,
            quantity = input.quantity,
            "Transfer registered"
        );
        Ok(result)
    }

    /// Register an exit
    #[tracing::instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn register_exit(
        &self,
        actor: &Actor,
        stock_id: Uuid,
        input: ExitInput,
    ) -> AppResult<StockView> {
        let reason = non_blank(&input.reason);

        let mut tx = self.db.begin().await?;
        let stock = exit_in(
            &mut tx,
            &self.signer,
            actor,
            stock_id,
            input.quantity,
            reason,
            None,
        )
        .await?;
        let view = load_view(&mut tx, stock.id).await?;
        tx.commit().await?;

        tracing::info!(stock_id = %stock.id, quantity = input.quantity, "Exit registered");
        Ok(view)
    }

    /// Edit the non-quantitative attributes of a row
    #[tracing::instrument(skip(self, actor, edit), fields(user_id = %actor.user_id))]
    pub async fn edit(&self, actor: &Actor, stock_id: Uuid, edit: StockEdit) -> AppResult<StockView> {
        let mut tx = self.db.begin().await?;
        let current = lock_stock(&mut tx, stock_id).await?;
        let before = StockSnapshot::from(&load_view(&mut tx, stock_id).await?);

        let edited = edit.apply_to(&current)?;
        ensure_references(&mut tx, &edit.referenced_ids()).await?;

        let key = edited.merge_key();
        if key != current.merge_key() {
            let holder = lock_by_merge_key(&mut tx, &key).await?.map(|other| other.id);
            check_merge_key_change(&current, &edited, holder)?;
        }

        let attrs = &edited.attributes;
        sqlx::query(
            r#"
            UPDATE stocks SET
                lot = $2, product = $3, cultivar_id = $4, screen_id = $5, category_id = $6,
                treatment_id = $7, species_id = $8, address = $9, packaging = $10,
                unit_weight = $11, company = $12, origin_destination = $13, az = $14,
                client = $15, observation = $16, updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(stock_id)
        .bind(&attrs.lot)
        .bind(&attrs.product)
        .bind(attrs.cultivar_id)
        .bind(attrs.screen_id)
        .bind(attrs.category_id)
        .bind(attrs.treatment_id)
        .bind(attrs.species_id)
        .bind(&edited.address)
        .bind(attrs.packaging.as_str())
        .bind(attrs.unit_weight)
        .bind(&attrs.company)
        .bind(&attrs.origin_destination)
        .bind(&attrs.az)
        .bind(&attrs.client)
        .bind(&attrs.observation)
        .bind(actor.now)
        .execute(&mut *tx)
        .await?;

        let view = load_view(&mut tx, stock_id).await?;
        let changes = describe_changes(&before, &StockSnapshot::from(&view));
        history::append(
            &mut tx,
            &self.signer,
            actor,
            NewMovement {
                stock_id: Some(stock_id),
                lot_ref: &attrs.lot,
                movement_type: MovementType::Edit,
                quantity: None,
                description: describe::edit(&changes),
                empenho_id: None,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(stock_id = %stock_id, changed = changes.len(), "Stock edited");
        Ok(view)
    }

    /// Delete a row, keeping its trail
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, stock_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let stock = lock_stock(&mut tx, stock_id).await?;

        let statuses = sqlx::query_scalar::<_, String>(
            r#"
            SELECT e.status FROM item_empenhos i
            JOIN empenhos e ON e.id = i.empenho_id
            WHERE i.source_stock_id = $1
            "#,
        )
        .bind(stock_id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|s| {
            EmpenhoStatus::parse(s)
                .ok_or_else(|| AppError::Internal(format!("Unknown empenho status {}", s)))
        })
        .collect::<AppResult<Vec<_>>>()?;
        ensure_stock_deletable(statuses)?;

        let drafted = sqlx::query(
            r#"
            DELETE FROM item_empenhos i
            USING empenhos e
            WHERE e.id = i.empenho_id AND i.source_stock_id = $1 AND e.status = 'DRAFT'
            "#,
        )
        .bind(stock_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM stocks WHERE id = $1")
            .bind(stock_id)
            .execute(&mut *tx)
            .await?;

        let lot_ref = describe::deleted_lot_ref(&stock.attributes.lot);
        history::append(
            &mut tx,
            &self.signer,
            actor,
            NewMovement {
                stock_id: None,
                lot_ref: &lot_ref,
                movement_type: MovementType::Exclusion,
                quantity: None,
                description: describe::exclusion(&stock.attributes.lot, &stock.address),
                empenho_id: None,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            stock_id = %stock_id,
            draft_items_removed = drafted,
            "Stock deleted"
        );
        Ok(())
    }

    /// Get one row
    pub async fn get(&self, stock_id: Uuid) -> AppResult<StockView> {
        let mut conn = self.db.acquire().await?;
        load_view(&mut conn, stock_id).await
    }

    /// Current balance of one row
    pub async fn balance(&self, stock_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM stocks WHERE id = $1")
            .bind(stock_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock".to_string()))
    }

    /// Filtered, paginated stock list with totals
    pub async fn list(&self, query: StockQuery) -> AppResult<StockListResponse> {
        let pagination = Pagination::from_query(query.page, query.per_page, MAX_PER_PAGE);
        let hide_depleted = ConfigurationService::new(self.db.clone())
            .get_solo()
            .await?
            .hide_depleted;
        let only_available = query.only_available || hide_depleted;

        let search = non_blank(&query.search).map(like_escape);
        let lot_prefix = non_blank(&query.lot_prefix)
            .map(|p| format!("{}%", like_escape(&p.to_uppercase())));
        let address = match non_blank(&query.address) {
            Some(raw) => Some(normalize_address(raw).map_err(|m| AppError::validation("address", m))?),
            None => None,
        };

        const FILTER: &str = r#"
            WHERE ($1::text IS NULL
                   OR s.lot ILIKE $1 || '%'
                   OR s.address ILIKE '%' || $1 || '%'
                   OR c.name ILIKE '%' || $1 || '%')
              AND ($2::text IS NULL OR s.lot LIKE $2)
              AND ($3::text IS NULL OR s.address = $3)
              AND ($4::uuid IS NULL OR s.cultivar_id = $4)
              AND (NOT $5 OR s.balance > 0)
        "#;

        let totals = sqlx::query_as::<_, TotalsRow>(&format!(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(s.balance) FILTER (WHERE s.packaging = 'BAG'), 0)::BIGINT AS total_bag,
                   COALESCE(SUM(s.balance) FILTER (WHERE s.packaging = 'SC'), 0)::BIGINT AS total_sc
            FROM stocks s
            JOIN cultivars c ON c.id = s.cultivar_id
            {}
            "#,
            FILTER
        ))
        .bind(&search)
        .bind(&lot_prefix)
        .bind(&address)
        .bind(query.cultivar_id)
        .bind(only_available)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, StockViewRow>(&format!(
            "{} {} ORDER BY s.updated_at DESC, s.id LIMIT $6 OFFSET $7",
            stock_view_select(),
            FILTER
        ))
        .bind(&search)
        .bind(&lot_prefix)
        .bind(&address)
        .bind(query.cultivar_id)
        .bind(only_available)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(StockListResponse {
            page: PaginatedResponse::new(into_views(rows)?, &pagination, totals.total as u64),
            totals: StockTotals::new(totals.total_bag, totals.total_sc),
        })
    }

    /// Most recent row of a lot, to prefill a new entry
    pub async fn lookup_lot(&self, lot: &str) -> AppResult<StockView> {
        let lot = normalize_lot(lot).map_err(|m| AppError::validation("lot", m))?;
        let row = sqlx::query_as::<_, StockViewRow>(&format!(
            "{} WHERE s.lot = $1 ORDER BY s.updated_at DESC LIMIT 1",
            stock_view_select()
        ))
        .bind(&lot)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        StockView::try_from(row)
    }

    /// Lots currently stored at an address
    pub async fn address_stock(&self, address: &str) -> AppResult<AddressStock> {
        let address = normalize_address(address).map_err(|m| AppError::validation("address", m))?;
        let rows = sqlx::query_as::<_, StockViewRow>(&format!(
            "{} WHERE s.address = $1 AND s.balance > 0 ORDER BY s.lot, s.id",
            stock_view_select()
        ))
        .bind(&address)
        .fetch_all(&self.db)
        .await?;

        let lots = into_views(rows)?;
        let total_balance = lots.iter().map(|v| v.balance).sum();
        Ok(AddressStock {
            has_stock: !lots.is_empty(),
            address,
            total_balance,
            lots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_sorts_and_dedups() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        assert_eq!(lock_order([high, low]), vec![low, high]);
        assert_eq!(lock_order([low, high]), vec![low, high]);
        assert_eq!(lock_order([high].into_iter().chain(None)), vec![high]);
        assert_eq!(lock_order([high, high]), vec![high]);
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("L_1%"), "L\\_1\\%");
        assert_eq!(like_escape("a\\b"), "a\\\\b");
        assert_eq!(like_escape("P-01"), "P-01");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(&Some("  ".into())), None);
        assert_eq!(non_blank(&Some(" x ".into())), Some("x"));
        assert_eq!(non_blank(&None), None);
    }

    #[test]
    fn test_attribute_references_include_optional_ids() {
        let mut attrs = StockAttributes {
            lot: "L1".into(),
            product: String::new(),
            cultivar_id: Uuid::from_u128(1),
            screen_id: Uuid::from_u128(2),
            category_id: Uuid::from_u128(3),
            treatment_id: None,
            species_id: None,
            packaging: Packaging::Bag,
            unit_weight: Decimal::ZERO,
            company: String::new(),
            origin_destination: String::new(),
            az: String::new(),
            client: String::new(),
            observation: None,
        };
        assert_eq!(attribute_references(&attrs).len(), 3);
        attrs.species_id = Some(Uuid::from_u128(5));
        let refs = attribute_references(&attrs);
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[3], (TaxonomyKind::Species, Uuid::from_u128(5)));
    }

    #[test]
    fn test_stock_row_rejects_unknown_packaging() {
        let now = Utc::now();
        let row = StockRow {
            id: Uuid::nil(),
            lot: "L1".into(),
            product: String::new(),
            cultivar_id: Uuid::nil(),
            screen_id: Uuid::nil(),
            category_id: Uuid::nil(),
            treatment_id: None,
            species_id: None,
            address: "P-01".into(),
            entries: 1,
            exits: 0,
            packaging: "BOX".into(),
            unit_weight: Decimal::ZERO,
            company: String::new(),
            origin_destination: String::new(),
            az: String::new(),
            client: String::new(),
            observation: None,
            operator_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        };
        assert!(Stock::try_from(row).is_err());
    }
}
