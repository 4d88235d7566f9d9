use micrograph_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// Balance view of a row from the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserBalance {
    pub id: DbId,
    pub tokens_available: i64,
    pub updated_at: Timestamp,
}
