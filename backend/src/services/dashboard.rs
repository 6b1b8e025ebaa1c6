//! Inventory dashboard aggregates

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{Actor, MovementHistory, StockTotals, TaxonomyKind};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::services::history::HistoryService;

const TOP_LIMIT: i64 = 10;
const RECENT_LIMIT: i64 = 10;

/// Dashboard service
#[derive(Clone)]
pub struct DashboardService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RankedBalance {
    pub name: String,
    pub total_balance: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WarehouseLoad {
    pub az: String,
    pub total_balance: i64,
    pub lot_count: i64,
    pub total_weight: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    #[serde(flatten)]
    pub totals: StockTotals,
    pub total_weight: Decimal,
    pub active_count: i64,
    pub depleted_count: i64,
    pub movements_this_month: i64,
    pub top_cultivars: Vec<RankedBalance>,
    pub top_categories: Vec<RankedBalance>,
    pub warehouse_load: Vec<WarehouseLoad>,
    pub recent_movements: Vec<MovementHistory>,
}

#[derive(Debug, FromRow)]
struct StockAggregates {
    total_bag: i64,
    total_sc: i64,
    total_weight: Decimal,
    active_count: i64,
    depleted_count: i64,
}

/// Midnight UTC on the first day of `now`'s month
fn month_start(now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    now.date_naive()
        .with_day(1)
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .ok_or_else(|| AppError::Internal("invalid month start".to_string()))
}

impl DashboardService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn summary(&self, actor: &Actor) -> AppResult<DashboardSummary> {
        let aggregates = sqlx::query_as::<_, StockAggregates>(
            r#"
            SELECT
                COALESCE(SUM(balance) FILTER (WHERE packaging = 'BAG' AND balance > 0), 0)::BIGINT AS total_bag,
                COALESCE(SUM(balance) FILTER (WHERE packaging = 'SC' AND balance > 0), 0)::BIGINT AS total_sc,
                COALESCE(SUM(balance * unit_weight) FILTER (WHERE balance > 0), 0) AS total_weight,
                COUNT(*) FILTER (WHERE balance > 0) AS active_count,
                COUNT(*) FILTER (WHERE balance = 0) AS depleted_count
            FROM stocks
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let movements_this_month = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM movement_history WHERE created_at >= $1",
        )
        .bind(month_start(actor.now)?)
        .fetch_one(&self.db)
        .await?;

        let top_cultivars = self.top_by(TaxonomyKind::Cultivar).await?;
        let top_categories = self.top_by(TaxonomyKind::Category).await?;

        let warehouse_load = sqlx::query_as::<_, WarehouseLoad>(
            r#"
            SELECT az,
                   SUM(balance)::BIGINT AS total_balance,
                   COUNT(*) AS lot_count,
                   COALESCE(SUM(balance * unit_weight), 0) AS total_weight
            FROM stocks
            WHERE balance > 0
            GROUP BY az
            ORDER BY az
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let recent_movements = HistoryService::new(self.db.clone())
            .recent(RECENT_LIMIT)
            .await?;

        Ok(DashboardSummary {
            totals: StockTotals::new(aggregates.total_bag, aggregates.total_sc),
            total_weight: aggregates.total_weight,
            active_count: aggregates.active_count,
            depleted_count: aggregates.depleted_count,
            movements_this_month,
            top_cultivars,
            top_categories,
            warehouse_load,
            recent_movements,
        })
    }

    /// Largest balances grouped by one taxonomy
    async fn top_by(&self, kind: TaxonomyKind) -> AppResult<Vec<RankedBalance>> {
        let rows = sqlx::query_as::<_, RankedBalance>(&format!(
            r#"
            SELECT t.name, SUM(s.balance)::BIGINT AS total_balance
            FROM stocks s
            JOIN {table} t ON t.id = s.{column}
            WHERE s.balance > 0
            GROUP BY t.name
            ORDER BY total_balance DESC, t.name
            LIMIT $1
            "#,
            table = kind.table(),
            column = kind.reference_column()
        ))
        .bind(TOP_LIMIT)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}
