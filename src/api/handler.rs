use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    ledger::models::WalletTransaction,
    ledger::repository::LedgerRepository,
    settlement::{
        scheduler::{PayoutCycleSummary, PayoutScheduler},
        SettlementOrchestrator,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub scheduler: Arc<PayoutScheduler>,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ========== SETTLEMENT ENTRY POINTS ==========

/// Credit a completed purchase to the platform wallet
/// POST /settlement/purchase/:purchase_id/credit
pub async fn credit_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> AppResult<Json<SettlementResponse>> {
    info!("Crediting purchase {}", purchase_id);

    let outcome = state.orchestrator.credit_on_purchase(purchase_id).await?;
    Ok(Json(SettlementResponse {
        reference_id: purchase_id,
        outcome,
    }))
}

/// Release the held course-creation share to the teacher
/// POST /settlement/purchase/:purchase_id/release
pub async fn release_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> AppResult<Json<SettlementResponse>> {
    info!("Releasing course creation fee for purchase {}", purchase_id);

    let outcome = state
        .orchestrator
        .release_course_creation_fee(purchase_id)
        .await?;
    Ok(Json(SettlementResponse {
        reference_id: purchase_id,
        outcome,
    }))
}

/// Direct teacher payout entry point kept for the payment subsystem's
/// existing call site; delegates to the canonical release path
/// POST /settlement/purchase/:purchase_id/payout
pub async fn payout_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> AppResult<Json<SettlementResponse>> {
    info!("Teacher payout for purchase {}", purchase_id);

    let outcome = state
        .orchestrator
        .teacher_payout_on_purchase(purchase_id)
        .await?;
    Ok(Json(SettlementResponse {
        reference_id: purchase_id,
        outcome,
    }))
}

/// Pay out an approved grading allocation
/// POST /settlement/allocation/:allocation_id/release
pub async fn release_allocation(
    State(state): State<AppState>,
    Path(allocation_id): Path<Uuid>,
) -> AppResult<Json<SettlementResponse>> {
    info!("Releasing grading fee for allocation {}", allocation_id);

    let outcome = state.orchestrator.release_grading_fee(allocation_id).await?;
    Ok(Json(SettlementResponse {
        reference_id: allocation_id,
        outcome,
    }))
}

/// Derived payout state of a purchase
/// GET /settlement/purchase/:purchase_id/state
pub async fn get_purchase_payout_state(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> AppResult<Json<PayoutStateResponse>> {
    state
        .ledger
        .get_purchase(purchase_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Purchase not found: {}", purchase_id)))?;

    let payout_state = state.orchestrator.payout_state(purchase_id).await?;
    Ok(Json(PayoutStateResponse {
        purchase_id,
        state: payout_state,
    }))
}

/// Trigger one payout sweep, for an external cron or an operator
/// POST /settlement/run
pub async fn run_payout_sweep(
    State(state): State<AppState>,
) -> AppResult<Json<PayoutCycleSummary>> {
    let summary = state.scheduler.run_cycle().await;
    Ok(Json(summary))
}

// ========== QUERY SURFACE ==========

/// GET /wallet/platform/:currency
pub async fn get_platform_wallet(
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> AppResult<Json<WalletResponse>> {
    let wallet = state
        .ledger
        .get_platform_wallet(&currency)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No platform wallet for {}", currency)))?;

    Ok(Json(wallet.into()))
}

/// GET /wallet/teacher/:teacher_id/:currency
pub async fn get_teacher_wallet(
    State(state): State<AppState>,
    Path((teacher_id, currency)): Path<(Uuid, String)>,
) -> AppResult<Json<WalletResponse>> {
    let wallet = state
        .ledger
        .get_teacher_wallet(teacher_id, &currency)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No wallet for teacher {} in {}",
                teacher_id, currency
            ))
        })?;

    Ok(Json(wallet.into()))
}

/// GET /wallet/:wallet_id/transactions
pub async fn list_wallet_transactions(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
) -> AppResult<Json<Vec<WalletTransactionResponse>>> {
    state
        .ledger
        .get_wallet(wallet_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Wallet not found: {}", wallet_id)))?;

    let rows = state.ledger.list_wallet_transactions(wallet_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// All ledger rows for one reference (purchase or allocation)
/// GET /transactions/reference/:reference_id
pub async fn list_reference_transactions(
    State(state): State<AppState>,
    Path(reference_id): Path<Uuid>,
) -> AppResult<Json<Vec<WalletTransactionResponse>>> {
    let rows = state.ledger.list_reference_transactions(reference_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Compare a wallet's stored total with the sum of its ledger rows
/// GET /wallet/:wallet_id/reconcile
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
) -> AppResult<Json<ReconciliationResponse>> {
    let wallet = state
        .ledger
        .get_wallet(wallet_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Wallet not found: {}", wallet_id)))?;

    let rows = state.ledger.list_wallet_transactions(wallet_id).await?;
    let ledger_total = WalletTransaction::sum(&rows);

    Ok(Json(ReconciliationResponse {
        wallet_id,
        stored_total: wallet.total,
        ledger_total,
        consistent: wallet.total == ledger_total,
        balanced: wallet.is_balanced(),
    }))
}
