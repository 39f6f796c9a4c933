use super::models::*;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const WALLET_COLUMNS: &str =
    "id, owner_kind, teacher_id, currency, total, available, hold, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, kind, amount, reference_id, reference_kind, \
     status, applied_rate, description, created_at";

/// Ledger repository - THE source of truth for wallet state
///
/// Balance mutations only ever run on a borrowed transaction so that the
/// gating reads, the wallet updates, and the ledger inserts of one
/// settlement commit or roll back as a unit.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // ========== WALLET OPERATIONS ==========

    /// Lock the platform wallet row for this currency, creating it on first
    /// use. The row lock serializes every settlement touching the platform
    /// wallet; two concurrent operations cannot both read the same hold.
    pub async fn lock_platform_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        currency: &str,
    ) -> AppResult<Wallet> {
        let existing = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE owner_kind = $1 AND currency = $2 FOR UPDATE"
        ))
        .bind(WalletOwnerKind::Platform)
        .bind(currency)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(wallet) = existing {
            return Ok(wallet);
        }

        // First credit for this currency. The partial unique index on
        // (currency) WHERE owner_kind = 'platform' makes the insert race-safe.
        sqlx::query(
            "INSERT INTO wallets (id, owner_kind, teacher_id, currency) \
             VALUES ($1, $2, NULL, $3) ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(WalletOwnerKind::Platform)
        .bind(currency)
        .execute(&mut **tx)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE owner_kind = $1 AND currency = $2 FOR UPDATE"
        ))
        .bind(WalletOwnerKind::Platform)
        .bind(currency)
        .fetch_one(&mut **tx)
        .await?;

        Ok(wallet)
    }

    /// Lock a teacher's wallet row, creating it on first payout.
    ///
    /// Lock order: the platform wallet is always locked before any teacher
    /// wallet, so settlement transactions cannot deadlock on each other.
    pub async fn lock_teacher_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        teacher_id: Uuid,
        currency: &str,
    ) -> AppResult<Wallet> {
        let existing = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE owner_kind = $1 AND teacher_id = $2 AND currency = $3 FOR UPDATE"
        ))
        .bind(WalletOwnerKind::Teacher)
        .bind(teacher_id)
        .bind(currency)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(wallet) = existing {
            return Ok(wallet);
        }

        sqlx::query(
            "INSERT INTO wallets (id, owner_kind, teacher_id, currency) \
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(WalletOwnerKind::Teacher)
        .bind(teacher_id)
        .bind(currency)
        .execute(&mut **tx)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE owner_kind = $1 AND teacher_id = $2 AND currency = $3 FOR UPDATE"
        ))
        .bind(WalletOwnerKind::Teacher)
        .bind(teacher_id)
        .bind(currency)
        .fetch_one(&mut **tx)
        .await?;

        Ok(wallet)
    }

    /// Persist the mutated balances of a wallet locked earlier in `tx`.
    pub async fn update_wallet_balances(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        wallet: &Wallet,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE wallets SET total = $2, available = $3, hold = $4, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(wallet.id)
        .bind(wallet.total)
        .bind(wallet.available)
        .bind(wallet.hold)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    pub async fn get_platform_wallet(&self, currency: &str) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_kind = $1 AND currency = $2"
        ))
        .bind(WalletOwnerKind::Platform)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    pub async fn get_teacher_wallet(
        &self,
        teacher_id: Uuid,
        currency: &str,
    ) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE owner_kind = $1 AND teacher_id = $2 AND currency = $3"
        ))
        .bind(WalletOwnerKind::Teacher)
        .bind(teacher_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    // ========== LEDGER ENTRIES ==========

    /// Idempotency probe: does any ledger row already carry this
    /// (reference id, reference kind) pair? Runs on the settlement
    /// transaction after the wallet lock, so a concurrent duplicate blocks
    /// on the lock and then observes the winner's rows.
    pub async fn reference_exists(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reference_id: Uuid,
        reference_kind: ReferenceKind,
    ) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM wallet_transactions \
             WHERE reference_id = $1 AND reference_kind = $2)",
        )
        .bind(reference_id)
        .bind(reference_kind)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    /// Append one ledger row. Rows are immutable once written; there is no
    /// update or delete path.
    pub async fn insert_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: NewWalletTransaction,
    ) -> AppResult<WalletTransaction> {
        let row = sqlx::query_as::<_, WalletTransaction>(&format!(
            "INSERT INTO wallet_transactions \
             (id, wallet_id, kind, amount, reference_id, reference_kind, status, applied_rate, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(entry.wallet_id)
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(entry.reference_id)
        .bind(entry.reference_kind)
        .bind(WalletTransactionStatus::Succeeded)
        .bind(entry.applied_rate)
        .bind(entry.description)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    pub async fn list_wallet_transactions(
        &self,
        wallet_id: Uuid,
    ) -> AppResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 ORDER BY created_at, id"
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_reference_transactions(
        &self,
        reference_id: Uuid,
    ) -> AppResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE reference_id = $1 ORDER BY created_at, id"
        ))
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Reference kinds present for a reference id; feeds the derived
    /// purchase payout state.
    pub async fn list_reference_kinds(&self, reference_id: Uuid) -> AppResult<Vec<ReferenceKind>> {
        let kinds = sqlx::query_scalar::<_, ReferenceKind>(
            "SELECT DISTINCT reference_kind FROM wallet_transactions WHERE reference_id = $1",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(kinds)
    }

    // ========== EXTERNAL RECORDS (read-only) ==========

    pub async fn load_purchase(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        purchase_id: Uuid,
    ) -> AppResult<Option<Purchase>> {
        let purchase = sqlx::query_as::<_, Purchase>(
            "SELECT id, course_id, teacher_id, final_amount, currency, status, paid_at, created_at \
             FROM purchases WHERE id = $1",
        )
        .bind(purchase_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(purchase)
    }

    /// Pool-side purchase lookup for the read-only query surface.
    pub async fn get_purchase(&self, purchase_id: Uuid) -> AppResult<Option<Purchase>> {
        let purchase = sqlx::query_as::<_, Purchase>(
            "SELECT id, course_id, teacher_id, final_amount, currency, status, paid_at, created_at \
             FROM purchases WHERE id = $1",
        )
        .bind(purchase_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }

    pub async fn load_allocation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        allocation_id: Uuid,
    ) -> AppResult<Option<EarningAllocation>> {
        let allocation = sqlx::query_as::<_, EarningAllocation>(
            "SELECT id, teacher_id, exercise_grading_amount, currency, status, created_at \
             FROM earning_allocations WHERE id = $1",
        )
        .bind(allocation_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(allocation)
    }

    /// Refund requests for one purchase, loaded on the settlement
    /// transaction so the guard check and the release commit or abort
    /// together.
    pub async fn list_refunds_for_purchase(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        purchase_id: Uuid,
    ) -> AppResult<Vec<RefundRequest>> {
        let refunds = sqlx::query_as::<_, RefundRequest>(
            "SELECT id, purchase_id, status, created_at \
             FROM refund_requests WHERE purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(refunds)
    }

    // ========== PAYOUT SCHEDULER SUPPORT ==========

    /// Completed purchases paid before `paid_before` that have been credited
    /// but whose creation share has not yet been paid out to the teacher.
    pub async fn list_due_purchases(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(
            "SELECT p.id, p.course_id, p.teacher_id, p.final_amount, p.currency, \
                    p.status, p.paid_at, p.created_at \
             FROM purchases p \
             WHERE p.status = $1 \
               AND p.paid_at IS NOT NULL \
               AND p.paid_at <= $2 \
               AND EXISTS (SELECT 1 FROM wallet_transactions wt \
                           WHERE wt.reference_id = p.id AND wt.reference_kind = $3) \
               AND NOT EXISTS (SELECT 1 FROM wallet_transactions wt \
                               WHERE wt.reference_id = p.id AND wt.reference_kind = $4) \
             ORDER BY p.paid_at \
             LIMIT $5",
        )
        .bind(PurchaseStatus::Completed)
        .bind(paid_before)
        .bind(ReferenceKind::CoursePurchase)
        .bind(ReferenceKind::TeacherPayout)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(purchases)
    }

    /// Approved grading allocations with no payout rows yet.
    pub async fn list_due_allocations(&self, limit: i64) -> AppResult<Vec<EarningAllocation>> {
        let allocations = sqlx::query_as::<_, EarningAllocation>(
            "SELECT a.id, a.teacher_id, a.exercise_grading_amount, a.currency, a.status, a.created_at \
             FROM earning_allocations a \
             WHERE a.status = $1 \
               AND a.exercise_grading_amount > 0 \
               AND NOT EXISTS (SELECT 1 FROM wallet_transactions wt \
                               WHERE wt.reference_id = a.id AND wt.reference_kind = $2) \
             ORDER BY a.created_at \
             LIMIT $3",
        )
        .bind(AllocationStatus::Approved)
        .bind(ReferenceKind::GradingFee)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(allocations)
    }
}
