use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::error::{AppResult, SettlementError};

/// Wallet owner kind - the platform holds one wallet per currency,
/// each teacher holds one wallet per currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_owner_kind", rename_all = "lowercase")]
pub enum WalletOwnerKind {
    Platform,
    Teacher,
}

impl fmt::Display for WalletOwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl WalletOwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletOwnerKind::Platform => "platform",
            WalletOwnerKind::Teacher => "teacher",
        }
    }
}

/// Wallet transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_transaction_kind", rename_all = "lowercase")]
pub enum WalletTransactionKind {
    Transfer,
    Payout,
}

/// What a ledger entry points back to. Together with the reference id this
/// pair detects and prevents duplicate settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "reference_kind", rename_all = "snake_case")]
pub enum ReferenceKind {
    CoursePurchase,
    CourseCreationFee,
    GradingFee,
    TeacherPayout,
}

/// Ledger entry status. Only `Succeeded` rows are ever persisted; an
/// attempted settlement that fails rolls back its rows with the enclosing
/// database transaction instead of leaving pending/failed entries behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_transaction_status", rename_all = "lowercase")]
pub enum WalletTransactionStatus {
    Succeeded,
}

/// Purchase status enum (externally owned, read-only here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "purchase_status", rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Refund request status enum (externally owned, read-only here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "refund_status", rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

/// Grading allocation status enum (externally owned, read-only here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "allocation_status", rename_all = "lowercase")]
pub enum AllocationStatus {
    Draft,
    Approved,
    Rejected,
}

/// Wallet entity - one row per money-holding party and currency
///
/// Invariant after every committed operation:
/// `total == available + hold`, all three non-negative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_kind: WalletOwnerKind,
    /// Present iff `owner_kind` is `Teacher`
    pub teacher_id: Option<Uuid>,
    pub currency: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub hold: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn is_balanced(&self) -> bool {
        self.total == self.available + self.hold
            && self.total >= Decimal::ZERO
            && self.available >= Decimal::ZERO
            && self.hold >= Decimal::ZERO
    }

    fn check_balanced(&self) -> AppResult<()> {
        if self.is_balanced() {
            Ok(())
        } else {
            Err(SettlementError::UnbalancedWallet {
                wallet_id: self.id,
                total: self.total,
                available: self.available,
                hold: self.hold,
            }
            .into())
        }
    }

    /// Credit incoming funds, splitting them between the spendable and the
    /// held portion. Used by the purchase credit on the platform wallet.
    pub fn credit_split(&mut self, available_part: Decimal, hold_part: Decimal) -> AppResult<()> {
        self.total += available_part + hold_part;
        self.available += available_part;
        self.hold += hold_part;
        self.check_balanced()
    }

    /// Credit spendable funds. Used on the teacher wallet when a held share
    /// is paid out.
    pub fn credit_available(&mut self, amount: Decimal) -> AppResult<()> {
        self.total += amount;
        self.available += amount;
        self.check_balanced()
    }

    /// Debit held funds out of the wallet. Fails loudly instead of letting
    /// the hold balance go negative.
    pub fn debit_hold(&mut self, amount: Decimal) -> AppResult<()> {
        if self.hold < amount {
            return Err(SettlementError::InsufficientHold {
                wallet_id: self.id,
                requested: amount,
                held: self.hold,
            }
            .into());
        }
        self.hold -= amount;
        self.total -= amount;
        self.check_balanced()
    }
}

/// Wallet transaction entity - immutable, append-only audit trail
///
/// `amount` is the signed delta applied to the wallet's `total`; summing a
/// wallet's rows reconstructs its current total balance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTransactionKind,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub reference_id: Uuid,
    pub reference_kind: ReferenceKind,
    pub status: WalletTransactionStatus,

    /// Fee rate that produced a share row, recorded so a later rate change
    /// cannot retroactively alter how a settled purchase was split
    #[serde(with = "rust_decimal::serde::float_option")]
    pub applied_rate: Option<Decimal>,

    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Sum of signed amounts; equals the owning wallet's `total` when
    /// `rows` is that wallet's complete ledger.
    pub fn sum(rows: &[WalletTransaction]) -> Decimal {
        rows.iter().map(|row| row.amount).sum()
    }
}

/// New ledger entry, not yet persisted
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub wallet_id: Uuid,
    pub kind: WalletTransactionKind,
    pub amount: Decimal,
    pub reference_id: Uuid,
    pub reference_kind: ReferenceKind,
    pub applied_rate: Option<Decimal>,
    pub description: String,
}

/// Purchase entity (externally owned, read-only input)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub course_id: Uuid,
    pub teacher_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub final_amount: Decimal,
    pub currency: String,

    pub status: PurchaseStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Refund request entity (externally owned, read-only input)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefundRequest {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
}

impl RefundRequest {
    /// Resolved or withdrawn refunds no longer block a payout.
    pub fn is_open_or_approved(&self) -> bool {
        matches!(self.status, RefundStatus::Pending | RefundStatus::Approved)
    }
}

/// Teacher grading-fee allocation (externally owned, read-only input)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EarningAllocation {
    pub id: Uuid,
    pub teacher_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub exercise_grading_amount: Decimal,
    pub currency: String,

    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
}

/// Payout state of a purchase, derived from its ledger rows.
///
/// `Unsettled` - no credit yet. `Held` - the purchase amount was credited to
/// the platform wallet and the teacher shares sit in hold. `Paid` - the
/// creation share has been transferred into the teacher wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchasePayoutState {
    Unsettled,
    Held,
    Paid,
}

impl PurchasePayoutState {
    /// Derive the state from the reference kinds of the purchase's ledger
    /// rows. The `(purchase, TeacherPayout)` pair only ever exists after the
    /// `(purchase, CoursePurchase)` credit, so `Paid` dominates `Held`.
    pub fn from_reference_kinds(kinds: &[ReferenceKind]) -> Self {
        if kinds.contains(&ReferenceKind::TeacherPayout) {
            PurchasePayoutState::Paid
        } else if kinds.contains(&ReferenceKind::CoursePurchase) {
            PurchasePayoutState::Held
        } else {
            PurchasePayoutState::Unsettled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rust_decimal_macros::dec;

    fn wallet(total: Decimal, available: Decimal, hold: Decimal) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            owner_kind: WalletOwnerKind::Platform,
            teacher_id: None,
            currency: "USD".to_string(),
            total,
            available,
            hold,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn credit_split_keeps_wallet_balanced() {
        let mut w = wallet(dec!(0), dec!(0), dec!(0));
        w.credit_split(dec!(100_000), dec!(900_000)).unwrap();

        assert_eq!(w.total, dec!(1_000_000));
        assert_eq!(w.available, dec!(100_000));
        assert_eq!(w.hold, dec!(900_000));
        assert!(w.is_balanced());
    }

    #[test]
    fn debit_hold_moves_funds_out_of_the_wallet() {
        let mut w = wallet(dec!(1_000_000), dec!(100_000), dec!(900_000));
        w.debit_hold(dec!(550_000)).unwrap();

        assert_eq!(w.total, dec!(450_000));
        assert_eq!(w.available, dec!(100_000));
        assert_eq!(w.hold, dec!(350_000));
        assert!(w.is_balanced());
    }

    #[test]
    fn debit_hold_rejects_overdraw() {
        let mut w = wallet(dec!(100), dec!(50), dec!(50));
        let err = w.debit_hold(dec!(51)).unwrap_err();

        assert!(matches!(
            err,
            AppError::Settlement(SettlementError::InsufficientHold { .. })
        ));
        // Balances untouched after the failed debit
        assert_eq!(w.total, dec!(100));
        assert_eq!(w.hold, dec!(50));
    }

    #[test]
    fn release_sequence_matches_worked_example() {
        // Purchase of 1,000,000: credit then release of the creation share
        let mut platform = wallet(dec!(0), dec!(0), dec!(0));
        let mut teacher = wallet(dec!(0), dec!(0), dec!(0));

        platform.credit_split(dec!(100_000), dec!(900_000)).unwrap();
        platform.debit_hold(dec!(550_000)).unwrap();
        teacher.credit_available(dec!(550_000)).unwrap();

        assert_eq!(platform.total, dec!(450_000));
        assert_eq!(platform.hold, dec!(350_000));
        assert_eq!(teacher.total, dec!(550_000));
        assert_eq!(teacher.available, dec!(550_000));
        assert!(platform.is_balanced() && teacher.is_balanced());
    }

    #[test]
    fn ledger_sum_reconstructs_total() {
        let wallet_id = Uuid::new_v4();
        let reference_id = Uuid::new_v4();
        let row = |amount: Decimal, kind, reference_kind| WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            reference_id,
            reference_kind,
            status: WalletTransactionStatus::Succeeded,
            applied_rate: None,
            description: String::new(),
            created_at: Utc::now(),
        };

        let rows = vec![
            row(
                dec!(100_000),
                WalletTransactionKind::Transfer,
                ReferenceKind::CoursePurchase,
            ),
            row(
                dec!(550_000),
                WalletTransactionKind::Transfer,
                ReferenceKind::CourseCreationFee,
            ),
            row(
                dec!(350_000),
                WalletTransactionKind::Transfer,
                ReferenceKind::GradingFee,
            ),
            row(
                dec!(-550_000),
                WalletTransactionKind::Payout,
                ReferenceKind::TeacherPayout,
            ),
        ];

        assert_eq!(WalletTransaction::sum(&rows), dec!(450_000));
    }

    #[test]
    fn payout_state_derivation() {
        use PurchasePayoutState::*;

        assert_eq!(PurchasePayoutState::from_reference_kinds(&[]), Unsettled);
        assert_eq!(
            PurchasePayoutState::from_reference_kinds(&[
                ReferenceKind::CoursePurchase,
                ReferenceKind::CourseCreationFee,
                ReferenceKind::GradingFee,
            ]),
            Held
        );
        assert_eq!(
            PurchasePayoutState::from_reference_kinds(&[
                ReferenceKind::CoursePurchase,
                ReferenceKind::CourseCreationFee,
                ReferenceKind::GradingFee,
                ReferenceKind::TeacherPayout,
            ]),
            Paid
        );
    }
}
