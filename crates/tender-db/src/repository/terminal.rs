//! # Terminal Session Repository
//!
//! Persists the polling key of every device payment so a status poll can
//! be answered, and polling resumed, after a page reload or a restart.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tender_core::{TerminalSession, TerminalState};

const COLUMNS: &str = "reference, order_id, device_id, amount_cents, state, attempts, \
    message, cancelled_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct TerminalSessionRepository {
    pool: SqlitePool,
}

impl TerminalSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TerminalSessionRepository { pool }
    }

    pub async fn insert(&self, session: &TerminalSession) -> DbResult<()> {
        debug!(reference = %session.reference, order_id = %session.order_id, "Saving terminal session");

        sqlx::query(
            r#"
            INSERT INTO terminal_sessions (
                reference, order_id, device_id, amount_cents, state, attempts,
                message, cancelled_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&session.reference)
        .bind(&session.order_id)
        .bind(&session.device_id)
        .bind(session.amount_cents)
        .bind(session.state)
        .bind(session.attempts)
        .bind(&session.message)
        .bind(session.cancelled_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, reference: &str) -> DbResult<Option<TerminalSession>> {
        let sql = format!("SELECT {} FROM terminal_sessions WHERE reference = ?1", COLUMNS);
        let session = sqlx::query_as::<_, TerminalSession>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    /// Latest session for an order.
    pub async fn get_by_order(&self, order_id: &str) -> DbResult<Option<TerminalSession>> {
        let sql = format!(
            "SELECT {} FROM terminal_sessions WHERE order_id = ?1 \
             ORDER BY created_at DESC LIMIT 1",
            COLUMNS
        );
        let session = sqlx::query_as::<_, TerminalSession>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    pub async fn list_by_state(&self, state: TerminalState) -> DbResult<Vec<TerminalSession>> {
        let sql = format!(
            "SELECT {} FROM terminal_sessions WHERE state = ?1 ORDER BY created_at ASC",
            COLUMNS
        );
        let sessions = sqlx::query_as::<_, TerminalSession>(&sql)
            .bind(state)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    /// Saves a poll result. Only moves a session that is still `from`,
    /// so a cancel written concurrently is never overwritten.
    pub async fn update_state(
        &self,
        reference: &str,
        from: TerminalState,
        to: TerminalState,
        attempts: i64,
        message: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE terminal_sessions
            SET state = ?1, attempts = ?2, message = COALESCE(?3, message), updated_at = ?4
            WHERE reference = ?5 AND state = ?6
            "#,
        )
        .bind(to)
        .bind(attempts)
        .bind(message)
        .bind(Utc::now())
        .bind(reference)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending → Cancelled. Returns false if the session was not Pending.
    pub async fn mark_cancelled(&self, reference: &str) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE terminal_sessions
            SET state = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE reference = ?3 AND state = ?4
            "#,
        )
        .bind(TerminalState::Cancelled)
        .bind(now)
        .bind(reference)
        .bind(TerminalState::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
