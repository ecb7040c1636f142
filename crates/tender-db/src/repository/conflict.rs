//! # Conflict Repository
//!
//! Settlements that could not be applied are written here for an operator
//! instead of being dropped.
//!
//! ```text
//! Worker finds settlement ──► order not OPEN / txn already elsewhere
//!                               │
//!                               ▼
//!                        record(kind, ...) ──► resolved = 0
//!                               │
//!                     operator investigates
//!                               │
//!                               ▼
//!                        resolve(id) ──► resolved = 1
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbResult;
use tender_core::{ConflictKind, ReconciliationConflict};

const COLUMNS: &str =
    "id, kind, order_id, provider_transaction_id, detail, resolved, created_at, resolved_at";

#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    pub async fn record(
        &self,
        kind: ConflictKind,
        order_id: Option<&str>,
        provider_transaction_id: Option<&str>,
        detail: &str,
    ) -> DbResult<ReconciliationConflict> {
        let conflict = ReconciliationConflict {
            id: Uuid::new_v4().to_string(),
            kind,
            order_id: order_id.map(str::to_string),
            provider_transaction_id: provider_transaction_id.map(str::to_string),
            detail: detail.to_string(),
            resolved: false,
            created_at: Utc::now(),
            resolved_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO reconciliation_conflicts (
                id, kind, order_id, provider_transaction_id, detail, resolved, created_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&conflict.id)
        .bind(conflict.kind)
        .bind(&conflict.order_id)
        .bind(&conflict.provider_transaction_id)
        .bind(&conflict.detail)
        .bind(conflict.resolved)
        .bind(conflict.created_at)
        .bind(conflict.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(conflict)
    }

    pub async fn list_unresolved(&self, limit: i64) -> DbResult<Vec<ReconciliationConflict>> {
        let sql = format!(
            "SELECT {} FROM reconciliation_conflicts WHERE resolved = 0 \
             ORDER BY created_at ASC LIMIT ?1",
            COLUMNS
        );
        let conflicts = sqlx::query_as::<_, ReconciliationConflict>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(conflicts)
    }

    /// Whether an unresolved conflict of this kind already exists for the
    /// transaction. Keeps the worker from re-alerting every cycle.
    pub async fn exists_unresolved(&self, kind: ConflictKind, provider_transaction_id: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM reconciliation_conflicts
            WHERE kind = ?1 AND provider_transaction_id = ?2 AND resolved = 0
            "#,
        )
        .bind(kind)
        .bind(provider_transaction_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn resolve(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE reconciliation_conflicts SET resolved = 1, resolved_at = ?1 \
             WHERE id = ?2 AND resolved = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_record_list_resolve() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.conflicts();

        let conflict = repo
            .record(
                ConflictKind::ApprovedAfterCancel,
                Some("ord-1"),
                Some("txn-1"),
                "terminal approved after cashier cancelled",
            )
            .await
            .unwrap();

        assert!(repo
            .exists_unresolved(ConflictKind::ApprovedAfterCancel, "txn-1")
            .await
            .unwrap());

        let open = repo.list_unresolved(10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, ConflictKind::ApprovedAfterCancel);

        assert!(repo.resolve(&conflict.id).await.unwrap());
        assert!(!repo.resolve(&conflict.id).await.unwrap());
        assert!(repo.list_unresolved(10).await.unwrap().is_empty());
    }
}
