//! Dashboard and audit handlers

use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::audit::{AuditReport, AuditService};
use crate::services::dashboard::{DashboardService, DashboardSummary};
use crate::AppState;

pub async fn get_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<DashboardSummary>> {
    let summary = DashboardService::new(state.db)
        .summary(&user.actor())
        .await?;
    Ok(Json(summary))
}

/// Invariant report over the ledger and its history (admin only)
pub async fn run_audit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<AuditReport>> {
    let report = AuditService::new(state.db, state.signer)
        .run_audit(&user.actor())
        .await?;
    Ok(Json(report))
}
