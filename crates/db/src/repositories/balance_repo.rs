//! Repository for user token balances and the `usage_charges` ledger.

use micrograph_core::types::UserId;
use sqlx::PgPool;

use crate::models::user::UserBalance;

/// Provides balance reads and idempotent usage charges.
pub struct BalanceRepo;

impl BalanceRepo {
    /// Deduct `tokens` from the user's balance, at most once per `usage_key`.
    ///
    /// The ledger insert and the decrement run in one transaction, and the
    /// decrement is applied in SQL rather than read-modify-written. Returns
    /// `true` if this call applied the charge, `false` if `usage_key` was
    /// already charged. Charging an unknown user fails and leaves no ledger
    /// row behind.
    pub async fn charge_usage(
        pool: &PgPool,
        user_id: UserId,
        usage_key: &str,
        tokens: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO usage_charges (usage_key, user_id, tokens) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (usage_key) DO NOTHING",
        )
        .bind(usage_key)
        .bind(user_id)
        .bind(tokens)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let updated = sqlx::query(
            "UPDATE users \
             SET tokens_available = tokens_available - $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(tokens)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(sqlx::Error::RowNotFound);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Current balance for a user.
    pub async fn find_balance(
        pool: &PgPool,
        user_id: UserId,
    ) -> Result<Option<UserBalance>, sqlx::Error> {
        sqlx::query_as::<_, UserBalance>(
            "SELECT id, tokens_available, updated_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}
