use chrono::{DateTime, Utc};
use sqlx::{Connection, SqliteConnection};

use super::{AuditEntry, AuditLog, Database};

impl Database {
    pub async fn list_audit_logs(&self, action: &str) -> Result<Vec<AuditLog>, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            "SELECT id, action, status, details, created_at FROM audit_logs WHERE action = ? ORDER BY id ASC",
        )
        .bind(action)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn insert_audit_log(
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO audit_logs (action, status, details, created_at) VALUES (?, ?, ?, ?)")
            .bind(entry.action)
            .bind(entry.status)
            .bind(entry.details.to_string())
            .bind(now)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Write an audit row inside a savepoint of the caller's transaction.
///
/// A failure rolls back only the savepoint: the caller's own writes stay
/// intact and commit or roll back with the outer transaction. Returns whether
/// the row was written.
pub async fn record_best_effort(conn: &mut SqliteConnection, entry: &AuditEntry, now: DateTime<Utc>) -> bool {
    let mut savepoint = match conn.begin().await {
        Ok(savepoint) => savepoint,
        Err(e) => {
            tracing::warn!(action = entry.action, error = %e, "Could not open audit savepoint");
            return false;
        }
    };

    match Database::insert_audit_log(&mut *savepoint, entry, now).await {
        Ok(()) => match savepoint.commit().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(action = entry.action, error = %e, "Failed to release audit savepoint");
                false
            }
        },
        Err(e) => {
            tracing::warn!(action = entry.action, error = %e, "Audit log write failed, continuing");
            if let Err(e) = savepoint.rollback().await {
                tracing::warn!(action = entry.action, error = %e, "Failed to roll back audit savepoint");
            }
            false
        }
    }
}
