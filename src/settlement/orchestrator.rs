//! Settlement orchestrator - the only writer of wallet balances.
//!
//! Each operation is one database transaction: gating reads, wallet-row
//! locks, balance updates, and ledger inserts commit or roll back together.
//! The idempotency probe on the (reference id, reference kind) pair runs
//! after the platform wallet lock is held, so concurrent duplicates
//! serialize on the row lock and the loser observes the winner's rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult, SettlementError};
use crate::fees::{self, FeeSchedule};
use crate::ledger::models::{
    AllocationStatus, NewWalletTransaction, Purchase, PurchasePayoutState, PurchaseStatus,
    ReferenceKind, WalletTransactionKind,
};
use crate::ledger::repository::LedgerRepository;
use crate::settlement::guard::RefundGuard;
use crate::settlement::retry::{with_retry, RetryPolicy};

/// Result of one settlement invocation.
///
/// `AlreadySettled` and `Deferred` are successful no-ops, not failures:
/// the first means an earlier invocation already applied this reference,
/// the second means an open refund blocks the release and the caller
/// should retry after the dispute resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Applied,
    AlreadySettled,
    Deferred,
}

pub struct SettlementOrchestrator {
    ledger: Arc<LedgerRepository>,
    guard: RefundGuard,
    schedules: Vec<FeeSchedule>,
    retry: RetryPolicy,
}

impl SettlementOrchestrator {
    pub fn new(
        ledger: Arc<LedgerRepository>,
        guard: RefundGuard,
        schedules: Vec<FeeSchedule>,
        retry: RetryPolicy,
    ) -> AppResult<Self> {
        if schedules.is_empty() {
            return Err(AppError::Config("At least one fee schedule is required".into()));
        }
        for schedule in &schedules {
            schedule.validate()?;
        }
        Ok(Self {
            ledger,
            guard,
            schedules,
            retry,
        })
    }

    // ========== PUBLIC OPERATIONS ==========

    /// Credit a completed purchase to the platform wallet: the system share
    /// becomes spendable immediately, the course-creation and grading shares
    /// go on hold pending the dispute window.
    pub async fn credit_on_purchase(&self, purchase_id: Uuid) -> AppResult<SettlementOutcome> {
        let result = with_retry("credit_on_purchase", &self.retry, || {
            self.credit_on_purchase_once(purchase_id)
        })
        .await;
        self.log_result("credit_on_purchase", purchase_id, result)
    }

    /// Release the held course-creation share of a purchase into the
    /// teacher's wallet, if no open refund blocks it.
    pub async fn release_course_creation_fee(
        &self,
        purchase_id: Uuid,
    ) -> AppResult<SettlementOutcome> {
        let result = with_retry("release_course_creation_fee", &self.retry, || {
            self.release_course_creation_fee_once(purchase_id)
        })
        .await;
        self.log_result("release_course_creation_fee", purchase_id, result)
    }

    /// Pay out an approved grading allocation from the platform hold into
    /// the teacher's wallet.
    pub async fn release_grading_fee(&self, allocation_id: Uuid) -> AppResult<SettlementOutcome> {
        let result = with_retry("release_grading_fee", &self.retry, || {
            self.release_grading_fee_once(allocation_id)
        })
        .await;
        self.log_result("release_grading_fee", allocation_id, result)
    }

    /// Entry point kept for the purchase flow's existing call site. The
    /// direct hold-to-teacher path and the course-creation release settle
    /// the same share, so both delegate to the one canonical release; the
    /// shared (purchase, TeacherPayout) idempotency key makes whichever
    /// runs second a no-op instead of a double credit.
    pub async fn teacher_payout_on_purchase(
        &self,
        purchase_id: Uuid,
    ) -> AppResult<SettlementOutcome> {
        self.release_course_creation_fee(purchase_id).await
    }

    /// Payout state of a purchase, derived from its ledger rows.
    pub async fn payout_state(&self, purchase_id: Uuid) -> AppResult<PurchasePayoutState> {
        let kinds = self.ledger.list_reference_kinds(purchase_id).await?;
        Ok(PurchasePayoutState::from_reference_kinds(&kinds))
    }

    // ========== SETTLEMENT LEGS ==========

    async fn credit_on_purchase_once(&self, purchase_id: Uuid) -> AppResult<SettlementOutcome> {
        let mut tx = self.ledger.begin_tx().await?;

        let purchase = self
            .ledger
            .load_purchase(&mut tx, purchase_id)
            .await?
            .ok_or(SettlementError::PurchaseNotFound(purchase_id))?;
        let paid_at = require_completed(&purchase)?;

        let mut platform = self
            .ledger
            .lock_platform_wallet(&mut tx, &purchase.currency)
            .await?;

        if self
            .ledger
            .reference_exists(&mut tx, purchase.id, ReferenceKind::CoursePurchase)
            .await?
        {
            info!("Purchase {} already credited, skipping", purchase.id);
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let schedule = fees::schedule_for(&self.schedules, paid_at)?;
        let split = fees::split(purchase.final_amount, schedule)?;

        platform.credit_split(split.system, split.course_creation + split.grading)?;
        self.ledger.update_wallet_balances(&mut tx, &platform).await?;

        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: platform.id,
                    kind: WalletTransactionKind::Transfer,
                    amount: split.system,
                    reference_id: purchase.id,
                    reference_kind: ReferenceKind::CoursePurchase,
                    applied_rate: Some(schedule.system_rate),
                    description: format!("System share of purchase {}", purchase.id),
                },
            )
            .await?;
        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: platform.id,
                    kind: WalletTransactionKind::Transfer,
                    amount: split.course_creation,
                    reference_id: purchase.id,
                    reference_kind: ReferenceKind::CourseCreationFee,
                    applied_rate: Some(schedule.course_creation_rate),
                    description: format!("Course creation share of purchase {} (held)", purchase.id),
                },
            )
            .await?;
        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: platform.id,
                    kind: WalletTransactionKind::Transfer,
                    amount: split.grading,
                    reference_id: purchase.id,
                    reference_kind: ReferenceKind::GradingFee,
                    applied_rate: Some(schedule.grading_rate),
                    description: format!("Grading share of purchase {} (held)", purchase.id),
                },
            )
            .await?;

        tx.commit().await?;

        info!(
            "✓ Credited purchase {}: {} {} ({} spendable, {} held)",
            purchase.id,
            purchase.final_amount,
            purchase.currency,
            split.system,
            split.course_creation + split.grading
        );
        Ok(SettlementOutcome::Applied)
    }

    async fn release_course_creation_fee_once(
        &self,
        purchase_id: Uuid,
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.ledger.begin_tx().await?;

        let purchase = self
            .ledger
            .load_purchase(&mut tx, purchase_id)
            .await?
            .ok_or(SettlementError::PurchaseNotFound(purchase_id))?;
        let paid_at = require_completed(&purchase)?;

        let mut platform = self
            .ledger
            .lock_platform_wallet(&mut tx, &purchase.currency)
            .await?;

        if self
            .ledger
            .reference_exists(&mut tx, purchase.id, ReferenceKind::TeacherPayout)
            .await?
        {
            info!("Purchase {} already paid out, skipping", purchase.id);
            return Ok(SettlementOutcome::AlreadySettled);
        }

        // The creation share can only leave hold if the purchase credit put
        // it there; paying an uncredited purchase would draw on other
        // purchases' held funds.
        if !self
            .ledger
            .reference_exists(&mut tx, purchase.id, ReferenceKind::CoursePurchase)
            .await?
        {
            return Err(SettlementError::InvalidState {
                entity: "Purchase",
                current: "not credited".to_string(),
                expected: "credited to the platform wallet".to_string(),
            }
            .into());
        }

        if self
            .guard
            .is_payout_blocked(&self.ledger, &mut tx, &purchase, paid_at)
            .await?
        {
            info!(
                "Payout for purchase {} blocked by open refund, deferring",
                purchase.id
            );
            return Ok(SettlementOutcome::Deferred);
        }

        let schedule = fees::schedule_for(&self.schedules, paid_at)?;
        let share = fees::split(purchase.final_amount, schedule)?.course_creation;

        platform.debit_hold(share)?;
        let mut teacher = self
            .ledger
            .lock_teacher_wallet(&mut tx, purchase.teacher_id, &purchase.currency)
            .await?;
        teacher.credit_available(share)?;

        self.ledger.update_wallet_balances(&mut tx, &platform).await?;
        self.ledger.update_wallet_balances(&mut tx, &teacher).await?;

        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: platform.id,
                    kind: WalletTransactionKind::Payout,
                    amount: -share,
                    reference_id: purchase.id,
                    reference_kind: ReferenceKind::TeacherPayout,
                    applied_rate: None,
                    description: format!(
                        "Course creation fee payout for purchase {} to teacher {}",
                        purchase.id, purchase.teacher_id
                    ),
                },
            )
            .await?;
        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: teacher.id,
                    kind: WalletTransactionKind::Payout,
                    amount: share,
                    reference_id: purchase.id,
                    reference_kind: ReferenceKind::TeacherPayout,
                    applied_rate: None,
                    description: format!("Course creation fee for purchase {}", purchase.id),
                },
            )
            .await?;

        tx.commit().await?;

        info!(
            "✓ Released course creation fee for purchase {}: {} {} to teacher {}",
            purchase.id, share, purchase.currency, purchase.teacher_id
        );
        Ok(SettlementOutcome::Applied)
    }

    async fn release_grading_fee_once(&self, allocation_id: Uuid) -> AppResult<SettlementOutcome> {
        let mut tx = self.ledger.begin_tx().await?;

        let allocation = self
            .ledger
            .load_allocation(&mut tx, allocation_id)
            .await?
            .ok_or(SettlementError::AllocationNotFound(allocation_id))?;

        if allocation.status != AllocationStatus::Approved {
            return Err(SettlementError::InvalidState {
                entity: "Allocation",
                current: format!("{:?}", allocation.status),
                expected: "Approved".to_string(),
            }
            .into());
        }
        if allocation.exercise_grading_amount <= rust_decimal::Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Allocation {} has non-positive grading amount {}",
                allocation.id, allocation.exercise_grading_amount
            )));
        }

        let mut platform = self
            .ledger
            .lock_platform_wallet(&mut tx, &allocation.currency)
            .await?;

        if self
            .ledger
            .reference_exists(&mut tx, allocation.id, ReferenceKind::GradingFee)
            .await?
        {
            info!("Allocation {} already paid out, skipping", allocation.id);
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let amount = allocation.exercise_grading_amount;
        platform.debit_hold(amount)?;
        let mut teacher = self
            .ledger
            .lock_teacher_wallet(&mut tx, allocation.teacher_id, &allocation.currency)
            .await?;
        teacher.credit_available(amount)?;

        self.ledger.update_wallet_balances(&mut tx, &platform).await?;
        self.ledger.update_wallet_balances(&mut tx, &teacher).await?;

        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: platform.id,
                    kind: WalletTransactionKind::Payout,
                    amount: -amount,
                    reference_id: allocation.id,
                    reference_kind: ReferenceKind::GradingFee,
                    applied_rate: None,
                    description: format!(
                        "Grading fee payout for allocation {} to teacher {}",
                        allocation.id, allocation.teacher_id
                    ),
                },
            )
            .await?;
        self.ledger
            .insert_transaction(
                &mut tx,
                NewWalletTransaction {
                    wallet_id: teacher.id,
                    kind: WalletTransactionKind::Payout,
                    amount,
                    reference_id: allocation.id,
                    reference_kind: ReferenceKind::GradingFee,
                    applied_rate: None,
                    description: format!("Grading fee for allocation {}", allocation.id),
                },
            )
            .await?;

        tx.commit().await?;

        info!(
            "✓ Released grading fee for allocation {}: {} {} to teacher {}",
            allocation.id, amount, allocation.currency, allocation.teacher_id
        );
        Ok(SettlementOutcome::Applied)
    }

    /// Permanent failures here are invisible without monitoring; log them
    /// with the reference that failed before handing them back.
    fn log_result(
        &self,
        operation: &str,
        reference_id: Uuid,
        result: AppResult<SettlementOutcome>,
    ) -> AppResult<SettlementOutcome> {
        if let Err(err) = &result {
            error!("✗ {}({}) failed: {}", operation, reference_id, err);
        }
        result
    }
}

/// A purchase enters settlement only once payment completed; a completed
/// purchase without a paid-at timestamp is corrupt upstream data.
fn require_completed(purchase: &Purchase) -> AppResult<DateTime<Utc>> {
    if purchase.status != PurchaseStatus::Completed {
        return Err(SettlementError::InvalidState {
            entity: "Purchase",
            current: format!("{:?}", purchase.status),
            expected: "Completed".to_string(),
        }
        .into());
    }
    purchase.paid_at.ok_or_else(|| {
        SettlementError::InvalidState {
            entity: "Purchase",
            current: "Completed without paid_at".to_string(),
            expected: "Completed with paid_at".to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn purchase(status: PurchaseStatus, paid_at: Option<DateTime<Utc>>) -> Purchase {
        Purchase {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            final_amount: dec!(1_000_000),
            currency: "USD".to_string(),
            status,
            paid_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_completed_paid_purchases_settle() {
        let paid = Utc::now();

        assert!(require_completed(&purchase(PurchaseStatus::Completed, Some(paid))).is_ok());
        assert!(require_completed(&purchase(PurchaseStatus::Pending, Some(paid))).is_err());
        assert!(require_completed(&purchase(PurchaseStatus::Cancelled, Some(paid))).is_err());
        assert!(require_completed(&purchase(PurchaseStatus::Completed, None)).is_err());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SettlementOutcome::AlreadySettled).unwrap(),
            "\"already_settled\""
        );
        assert_eq!(
            serde_json::to_string(&SettlementOutcome::Deferred).unwrap(),
            "\"deferred\""
        );
    }
}
