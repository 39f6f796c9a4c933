use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::models::{
    PurchasePayoutState, ReferenceKind, Wallet, WalletOwnerKind, WalletTransaction,
    WalletTransactionKind, WalletTransactionStatus,
};
use crate::settlement::SettlementOutcome;

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub owner_kind: WalletOwnerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<Uuid>,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub hold: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            owner_kind: wallet.owner_kind,
            teacher_id: wallet.teacher_id,
            currency: wallet.currency,
            total: wallet.total,
            available: wallet.available,
            hold: wallet.hold,
            updated_at: wallet.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletTransactionResponse {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTransactionKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference_id: Uuid,
    pub reference_kind: ReferenceKind,
    pub status: WalletTransactionStatus,
    #[serde(with = "rust_decimal::serde::float_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_rate: Option<Decimal>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<WalletTransaction> for WalletTransactionResponse {
    fn from(row: WalletTransaction) -> Self {
        Self {
            id: row.id,
            wallet_id: row.wallet_id,
            kind: row.kind,
            amount: row.amount,
            reference_id: row.reference_id,
            reference_kind: row.reference_kind,
            status: row.status,
            applied_rate: row.applied_rate,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub reference_id: Uuid,
    pub outcome: SettlementOutcome,
}

#[derive(Debug, Serialize)]
pub struct PayoutStateResponse {
    pub purchase_id: Uuid,
    pub state: PurchasePayoutState,
}

/// Reconciliation report: the stored wallet total against the sum of the
/// wallet's ledger rows. The two diverging means manual investigation.
#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub wallet_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub stored_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub ledger_total: Decimal,
    pub consistent: bool,
    pub balanced: bool,
}
