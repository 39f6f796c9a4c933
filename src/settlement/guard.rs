//! Refund guard - the read-only predicate that gates release of held funds.
//!
//! A payout is blocked while any refund request filed inside the dispute
//! window is still pending or approved. The check runs on the same database
//! transaction as the release so a refund approved between check and
//! transfer cannot slip through.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};

use crate::error::AppResult;
use crate::ledger::models::{Purchase, RefundRequest};
use crate::ledger::repository::LedgerRepository;

/// Does this refund request block release of the purchase's held shares?
/// True for an open or approved refund filed within
/// `[paid_at, paid_at + window]`, bounds inclusive.
pub fn refund_blocks_release(
    paid_at: DateTime<Utc>,
    refund: &RefundRequest,
    window: Duration,
) -> bool {
    refund.is_open_or_approved()
        && refund.created_at >= paid_at
        && refund.created_at <= paid_at + window
}

pub struct RefundGuard {
    window: Duration,
}

impl RefundGuard {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Evaluate the blocking predicate for a purchase on the settlement
    /// transaction. `paid_at` must be present; the orchestrator has already
    /// rejected unpaid purchases by the time the guard runs.
    pub async fn is_payout_blocked(
        &self,
        ledger: &LedgerRepository,
        tx: &mut Transaction<'_, Postgres>,
        purchase: &Purchase,
        paid_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let refunds = ledger.list_refunds_for_purchase(tx, purchase.id).await?;
        Ok(refunds
            .iter()
            .any(|refund| refund_blocks_release(paid_at, refund, self.window)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::RefundStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn refund(status: RefundStatus, created_at: DateTime<Utc>) -> RefundRequest {
        RefundRequest {
            id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            status,
            created_at,
        }
    }

    fn paid_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn pending_refund_inside_window_blocks() {
        let r = refund(RefundStatus::Pending, paid_at() + Duration::days(1));
        assert!(refund_blocks_release(paid_at(), &r, Duration::days(3)));
    }

    #[test]
    fn approved_refund_inside_window_blocks() {
        let r = refund(RefundStatus::Approved, paid_at() + Duration::hours(2));
        assert!(refund_blocks_release(paid_at(), &r, Duration::days(3)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let at_start = refund(RefundStatus::Pending, paid_at());
        let at_end = refund(RefundStatus::Pending, paid_at() + Duration::days(3));
        let past_end =
            refund(RefundStatus::Pending, paid_at() + Duration::days(3) + Duration::seconds(1));

        assert!(refund_blocks_release(paid_at(), &at_start, Duration::days(3)));
        assert!(refund_blocks_release(paid_at(), &at_end, Duration::days(3)));
        assert!(!refund_blocks_release(paid_at(), &past_end, Duration::days(3)));
    }

    #[test]
    fn refund_filed_before_payment_does_not_block() {
        let r = refund(RefundStatus::Pending, paid_at() - Duration::hours(1));
        assert!(!refund_blocks_release(paid_at(), &r, Duration::days(3)));
    }

    #[test]
    fn resolved_refunds_do_not_block() {
        let rejected = refund(RefundStatus::Rejected, paid_at() + Duration::days(1));
        let withdrawn = refund(RefundStatus::Withdrawn, paid_at() + Duration::days(1));

        assert!(!refund_blocks_release(paid_at(), &rejected, Duration::days(3)));
        assert!(!refund_blocks_release(paid_at(), &withdrawn, Duration::days(3)));
    }
}
