//! Movement history writer and queries
//!
//! Every ledger mutation appends one row here inside the caller's
//! transaction. Rows are signed with an HMAC so the audit can detect edits
//! made behind the application's back.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared::{checksum_payload, Actor, MovementHistory, MovementType, PaginatedResponse, Pagination};
use sqlx::{FromRow, PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Global trail page size
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Signs and verifies history checksums
#[derive(Clone)]
pub struct HistorySigner {
    key: Arc<[u8]>,
}

impl HistorySigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Arc::from(secret.as_bytes()),
        }
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))
    }

    /// Base64 HMAC-SHA256 over the canonical payload
    pub fn sign(
        &self,
        movement_type: MovementType,
        description: &str,
        created_at: DateTime<Utc>,
        user_id: Uuid,
    ) -> AppResult<String> {
        let mut mac = self.mac()?;
        mac.update(checksum_payload(movement_type, description, created_at, user_id).as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a stored row
    pub fn verify(&self, row: &MovementHistory) -> AppResult<bool> {
        let Ok(expected) = BASE64.decode(&row.checksum) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(
            checksum_payload(row.movement_type, &row.description, row.created_at, row.user_id)
                .as_bytes(),
        );
        Ok(mac.verify_slice(&expected).is_ok())
    }
}

/// A history row about to be appended
#[derive(Debug)]
pub struct NewMovement<'a> {
    pub stock_id: Option<Uuid>,
    pub lot_ref: &'a str,
    pub movement_type: MovementType,
    pub quantity: Option<i64>,
    pub description: String,
    pub empenho_id: Option<Uuid>,
}

/// Database row for movement history
#[derive(Debug, FromRow)]
pub(crate) struct HistoryRow {
    id: Uuid,
    seq: i64,
    stock_id: Option<Uuid>,
    lot_ref: String,
    user_id: Uuid,
    username: Option<String>,
    movement_type: String,
    quantity: Option<i64>,
    description: String,
    empenho_id: Option<Uuid>,
    checksum: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for MovementHistory {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::parse(&row.movement_type).ok_or_else(|| {
            AppError::Internal(format!("unknown movement type {}", row.movement_type))
        })?;
        Ok(MovementHistory {
            id: row.id,
            seq: row.seq,
            stock_id: row.stock_id,
            lot_ref: row.lot_ref,
            user_id: row.user_id,
            username: row.username,
            movement_type,
            quantity: row.quantity,
            description: row.description,
            empenho_id: row.empenho_id,
            checksum: row.checksum,
            created_at: row.created_at,
        })
    }
}

pub(crate) const HISTORY_SELECT: &str = r#"
    SELECT h.id, h.seq, h.stock_id, h.lot_ref, h.user_id, u.username, h.movement_type,
           h.quantity, h.description, h.empenho_id, h.checksum, h.created_at
    FROM movement_history h
    LEFT JOIN users u ON u.id = h.user_id
"#;

pub(crate) fn into_history(rows: Vec<HistoryRow>) -> AppResult<Vec<MovementHistory>> {
    rows.into_iter().map(MovementHistory::try_from).collect()
}

/// Append a signed history row inside the caller's transaction
pub async fn append(
    conn: &mut PgConnection,
    signer: &HistorySigner,
    actor: &Actor,
    movement: NewMovement<'_>,
) -> AppResult<Uuid> {
    // Postgres keeps microseconds; sign what will be read back
    let created_at = actor.now.trunc_subsecs(6);
    let checksum = signer.sign(
        movement.movement_type,
        &movement.description,
        created_at,
        actor.user_id,
    )?;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO movement_history (
            stock_id, lot_ref, user_id, movement_type, quantity,
            description, empenho_id, checksum, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(movement.stock_id)
    .bind(movement.lot_ref)
    .bind(actor.user_id)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity)
    .bind(&movement.description)
    .bind(movement.empenho_id)
    .bind(&checksum)
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        history_id = %id,
        stock_id = ?movement.stock_id,
        movement_type = movement.movement_type.as_str(),
        quantity = ?movement.quantity,
        user_id = %actor.user_id,
        "History appended"
    );

    Ok(id)
}

/// History queries
#[derive(Clone)]
pub struct HistoryService {
    db: PgPool,
}

impl HistoryService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Trail of one stock row, oldest first
    pub async fn for_stock(&self, stock_id: Uuid) -> AppResult<Vec<MovementHistory>> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM stocks WHERE id = $1)")
                .bind(stock_id)
                .fetch_one(&self.db)
                .await?;
        if !exists {
            return Err(AppError::NotFound("Stock".to_string()));
        }

        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "{} WHERE h.stock_id = $1 ORDER BY h.seq",
            HISTORY_SELECT
        ))
        .bind(stock_id)
        .fetch_all(&self.db)
        .await?;

        into_history(rows)
    }

    /// Global trail, newest first
    pub async fn page(&self, page: Option<u32>) -> AppResult<PaginatedResponse<MovementHistory>> {
        let pagination = Pagination {
            page: page.unwrap_or(1).max(1),
            per_page: HISTORY_PAGE_SIZE,
        };

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM movement_history")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "{} ORDER BY h.seq DESC LIMIT $1 OFFSET $2",
            HISTORY_SELECT
        ))
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(
            into_history(rows)?,
            &pagination,
            total as u64,
        ))
    }

    /// Most recent rows, for the dashboard
    pub async fn recent(&self, limit: i64) -> AppResult<Vec<MovementHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "{} ORDER BY h.seq DESC LIMIT $1",
            HISTORY_SELECT
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        into_history(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signed_row(signer: &HistorySigner, description: &str) -> MovementHistory {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let user_id = Uuid::from_u128(42);
        MovementHistory {
            id: Uuid::nil(),
            seq: 1,
            stock_id: None,
            lot_ref: "L1".into(),
            user_id,
            username: None,
            movement_type: MovementType::Exit,
            quantity: Some(3),
            description: description.into(),
            empenho_id: None,
            checksum: signer
                .sign(MovementType::Exit, description, created_at, user_id)
                .unwrap(),
            created_at,
        }
    }

    #[test]
    fn test_signed_row_verifies() {
        let signer = HistorySigner::new("a-long-enough-secret");
        let row = signed_row(&signer, "Saída de <b>3</b> unid.");
        assert!(signer.verify(&row).unwrap());
        assert_eq!(BASE64.decode(&row.checksum).unwrap().len(), 32);
    }

    #[test]
    fn test_tampering_is_detected() {
        let signer = HistorySigner::new("a-long-enough-secret");
        let mut row = signed_row(&signer, "Saída de <b>3</b> unid.");
        row.description = "Saída de <b>30</b> unid.".into();
        assert!(!signer.verify(&row).unwrap());

        let other = HistorySigner::new("another-secret-value");
        let row = signed_row(&signer, "x");
        assert!(!other.verify(&row).unwrap());
    }

    #[test]
    fn test_garbage_checksum_does_not_verify() {
        let signer = HistorySigner::new("a-long-enough-secret");
        let mut row = signed_row(&signer, "x");
        row.checksum = "not base64!".into();
        assert!(!signer.verify(&row).unwrap());
    }

    #[test]
    fn test_signature_covers_timestamp_precision() {
        let signer = HistorySigner::new("k");
        let at = Utc::now();
        let truncated = at.trunc_subsecs(6);
        let user = Uuid::nil();
        let a = signer.sign(MovementType::Edit, "d", truncated, user).unwrap();
        let b = signer.sign(MovementType::Edit, "d", truncated, user).unwrap();
        assert_eq!(a, b);
    }
}
