//! Read-only invariant checker over the ledger and its history

use serde::Serialize;
use shared::{replay_quantities, Actor, MovementType};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::history::{into_history, HistoryRow, HistorySigner, HISTORY_SELECT};

/// History rows verified per query
const CHECKSUM_BATCH: i64 = 500;

/// Audit service
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
    signer: HistorySigner,
}

/// Stock row whose counters break `entries >= exits >= 0`
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct QuantityViolation {
    pub stock_id: Uuid,
    pub lot: String,
    pub address: String,
    pub entries: i64,
    pub exits: i64,
}

/// Several rows sharing one merge key
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct DuplicateGroup {
    pub lot: String,
    pub address: String,
    pub stock_ids: Vec<Uuid>,
}

/// History row whose checksum does not verify
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChecksumMismatch {
    pub history_id: Uuid,
    pub seq: i64,
    pub lot_ref: String,
}

/// Stock whose counters differ from the replay of its history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplayMismatch {
    pub stock_id: Uuid,
    pub lot: String,
    pub entries: i64,
    pub exits: i64,
    pub replayed_entries: i64,
    pub replayed_exits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub ok: bool,
    pub stocks_checked: i64,
    pub history_checked: i64,
    pub quantity_violations: Vec<QuantityViolation>,
    pub duplicate_merge_keys: Vec<DuplicateGroup>,
    pub checksum_mismatches: Vec<ChecksumMismatch>,
    pub replay_mismatches: Vec<ReplayMismatch>,
}

impl AuditReport {
    fn finish(mut self) -> Self {
        self.ok = self.quantity_violations.is_empty()
            && self.duplicate_merge_keys.is_empty()
            && self.checksum_mismatches.is_empty()
            && self.replay_mismatches.is_empty();
        self
    }
}

#[derive(Debug, FromRow)]
struct StockCounters {
    id: Uuid,
    lot: String,
    entries: i64,
    exits: i64,
}

#[derive(Debug, FromRow)]
struct MovementTotal {
    stock_id: Uuid,
    movement_type: String,
    quantity: Option<i64>,
}

/// Compare stored counters against per-stock, per-type history sums
fn replay_mismatches(
    stocks: Vec<StockCounters>,
    totals: Vec<MovementTotal>,
) -> AppResult<Vec<ReplayMismatch>> {
    let mut by_stock: BTreeMap<Uuid, Vec<(MovementType, Option<i64>)>> = BTreeMap::new();
    for total in totals {
        let movement_type = MovementType::parse(&total.movement_type).ok_or_else(|| {
            AppError::Internal(format!("unknown movement type {}", total.movement_type))
        })?;
        by_stock
            .entry(total.stock_id)
            .or_default()
            .push((movement_type, total.quantity));
    }

    Ok(stocks
        .into_iter()
        .filter_map(|stock| {
            let rows = by_stock.remove(&stock.id).unwrap_or_default();
            let (replayed_entries, replayed_exits) = replay_quantities(rows);
            if replayed_entries == stock.entries && replayed_exits == stock.exits {
                return None;
            }
            Some(ReplayMismatch {
                stock_id: stock.id,
                lot: stock.lot,
                entries: stock.entries,
                exits: stock.exits,
                replayed_entries,
                replayed_exits,
            })
        })
        .collect())
}

impl AuditService {
    pub fn new(db: PgPool, signer: HistorySigner) -> Self {
        Self { db, signer }
    }

    /// Check every ledger invariant; nothing is modified
    pub async fn run_audit(&self, actor: &Actor) -> AppResult<AuditReport> {
        if !actor.is_admin {
            return Err(AppError::AuthorizationDenied(
                "administrator role required".to_string(),
            ));
        }

        let quantity_violations = sqlx::query_as::<_, QuantityViolation>(
            r#"
            SELECT id AS stock_id, lot, address, entries, exits
            FROM stocks
            WHERE exits < 0 OR entries < exits
            ORDER BY lot, address
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let duplicate_merge_keys = sqlx::query_as::<_, DuplicateGroup>(
            r#"
            SELECT lot, address, array_agg(id ORDER BY id) AS stock_ids
            FROM stocks
            GROUP BY lot, address, cultivar_id, screen_id, category_id, treatment_id,
                     packaging, company
            HAVING COUNT(*) > 1
            ORDER BY lot, address
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let (history_checked, checksum_mismatches) = self.verify_checksums().await?;

        let stocks = sqlx::query_as::<_, StockCounters>(
            "SELECT id, lot, entries, exits FROM stocks ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        let stocks_checked = stocks.len() as i64;

        let totals = sqlx::query_as::<_, MovementTotal>(
            r#"
            SELECT stock_id, movement_type, SUM(quantity)::BIGINT AS quantity
            FROM movement_history
            WHERE stock_id IS NOT NULL
            GROUP BY stock_id, movement_type
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let report = AuditReport {
            ok: false,
            stocks_checked,
            history_checked,
            quantity_violations,
            duplicate_merge_keys,
            checksum_mismatches,
            replay_mismatches: replay_mismatches(stocks, totals)?,
        }
        .finish();

        if report.ok {
            tracing::info!(user_id = %actor.user_id, stocks = stocks_checked, history = history_checked, "Audit passed");
        } else {
            tracing::warn!(
                user_id = %actor.user_id,
                quantity_violations = report.quantity_violations.len(),
                duplicate_merge_keys = report.duplicate_merge_keys.len(),
                checksum_mismatches = report.checksum_mismatches.len(),
                replay_mismatches = report.replay_mismatches.len(),
                "Audit found violations"
            );
        }
        Ok(report)
    }

    async fn verify_checksums(&self) -> AppResult<(i64, Vec<ChecksumMismatch>)> {
        let mut checked = 0;
        let mut mismatches = Vec::new();
        let mut after_seq = 0_i64;

        loop {
            let rows = sqlx::query_as::<_, HistoryRow>(&format!(
                "{} WHERE h.seq > $1 ORDER BY h.seq LIMIT $2",
                HISTORY_SELECT
            ))
            .bind(after_seq)
            .bind(CHECKSUM_BATCH)
            .fetch_all(&self.db)
            .await?;
            let batch = into_history(rows)?;
            let Some(last) = batch.last() else {
                break;
            };
            after_seq = last.seq;

            for row in &batch {
                checked += 1;
                if !self.signer.verify(row)? {
                    mismatches.push(ChecksumMismatch {
                        history_id: row.id,
                        seq: row.seq,
                        lot_ref: row.lot_ref.clone(),
                    });
                }
            }
        }

        Ok((checked, mismatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(id: u128, entries: i64, exits: i64) -> StockCounters {
        StockCounters {
            id: Uuid::from_u128(id),
            lot: format!("L{}", id),
            entries,
            exits,
        }
    }

    fn total(id: u128, movement_type: MovementType, quantity: i64) -> MovementTotal {
        MovementTotal {
            stock_id: Uuid::from_u128(id),
            movement_type: movement_type.as_str().to_string(),
            quantity: Some(quantity),
        }
    }

    #[test]
    fn test_replay_matches_counters() {
        let stocks = vec![counters(1, 150, 40), counters(2, 40, 0)];
        let totals = vec![
            total(1, MovementType::EntryInitial, 100),
            total(1, MovementType::EntrySum, 50),
            total(1, MovementType::TransferOut, 40),
            total(1, MovementType::Edit, 0),
            total(2, MovementType::TransferIn, 40),
        ];
        assert!(replay_mismatches(stocks, totals).unwrap().is_empty());
    }

    #[test]
    fn test_replay_reports_drift() {
        let stocks = vec![counters(1, 100, 10), counters(3, 5, 0)];
        let totals = vec![
            total(1, MovementType::EntryInitial, 100),
            total(1, MovementType::EmpenhoExit, 30),
        ];
        let mismatches = replay_mismatches(stocks, totals).unwrap();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].replayed_exits, 30);
        // A stock with no history at all replays to zero
        assert_eq!(mismatches[1].stock_id, Uuid::from_u128(3));
        assert_eq!(mismatches[1].replayed_entries, 0);
    }

    #[test]
    fn test_replay_rejects_unknown_type() {
        let totals = vec![MovementTotal {
            stock_id: Uuid::from_u128(1),
            movement_type: "TELEPORT".into(),
            quantity: Some(1),
        }];
        assert!(replay_mismatches(vec![counters(1, 0, 0)], totals).is_err());
    }

    #[test]
    fn test_report_ok_flag() {
        let report = AuditReport {
            ok: false,
            stocks_checked: 0,
            history_checked: 0,
            quantity_violations: vec![],
            duplicate_merge_keys: vec![],
            checksum_mismatches: vec![],
            replay_mismatches: vec![],
        }
        .finish();
        assert!(report.ok);

        let report = AuditReport {
            checksum_mismatches: vec![ChecksumMismatch {
                history_id: Uuid::nil(),
                seq: 1,
                lot_ref: "L1".into(),
            }],
            ..report
        }
        .finish();
        assert!(!report.ok);
    }
}
