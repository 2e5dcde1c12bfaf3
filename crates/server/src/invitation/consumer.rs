use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::redact;
use crate::db::{record_best_effort, rollback_quietly, AuditEntry, Database};
use crate::error::ErrorKind;

pub const AUDIT_INVITATION_USED: &str = "invitation_used";

#[derive(Debug, Error)]
pub enum ConsumptionError {
    #[error("invitation token must not be empty")]
    EmptyToken,

    #[error("invitation token not found")]
    InvalidToken,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ConsumptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsumptionError::EmptyToken => ErrorKind::Validation,
            ConsumptionError::InvalidToken => ErrorKind::InvalidToken,
            ConsumptionError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Outcome of a consume call. Both fresh and repeated consumption succeed;
/// `already_consumed` tells them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionReceipt {
    pub invitation_id: String,
    pub customer_id: Option<i64>,
    pub consumed: bool,
    pub already_consumed: bool,
    pub affected_rows: u64,
    pub consumed_at: Option<DateTime<Utc>>,
    /// Whether the audit row was written. Always false when already consumed.
    pub audited: bool,
}

/// Marks invitations used, exactly once.
#[derive(Clone)]
pub struct InvitationConsumer {
    db: Database,
}

impl InvitationConsumer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn consume(&self, token: &str) -> Result<ConsumptionReceipt, ConsumptionError> {
        self.consume_at(token, Utc::now()).await
    }

    #[tracing::instrument(skip(self, token), fields(token = %redact(token)))]
    pub async fn consume_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumptionReceipt, ConsumptionError> {
        if token.trim().is_empty() {
            return Err(ConsumptionError::EmptyToken);
        }

        let mut tx = self.db.begin_write().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to open consumption transaction");
            ConsumptionError::Storage(e)
        })?;

        let receipt = match Self::consume_in(&mut tx, token, now).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if let ConsumptionError::Storage(source) = &e {
                    tracing::error!(error = %source, "Invitation consumption failed, rolling back");
                }
                rollback_quietly(tx, "consume_invitation").await;
                return Err(e);
            }
        };

        tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit invitation consumption");
            ConsumptionError::Storage(e)
        })?;

        if receipt.already_consumed {
            tracing::info!(invitation_id = %receipt.invitation_id, "Invitation was already consumed");
        } else {
            tracing::info!(
                invitation_id = %receipt.invitation_id,
                customer_id = ?receipt.customer_id,
                audited = receipt.audited,
                "Invitation consumed"
            );
        }
        Ok(receipt)
    }

    /// Consume inside the caller's transaction. The caller owns commit and
    /// rollback.
    ///
    /// The conditional update runs first and its affected-row count decides
    /// the outcome; state is never read before it is written.
    pub async fn consume_in(
        conn: &mut SqliteConnection,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumptionReceipt, ConsumptionError> {
        let affected_rows = Database::mark_invitation_consumed(&mut *conn, token, now).await?;

        let invitation = Database::find_invitation_by_token(&mut *conn, token)
            .await?
            .ok_or(ConsumptionError::InvalidToken)?;

        if affected_rows == 0 {
            return Ok(ConsumptionReceipt {
                invitation_id: invitation.id.clone(),
                customer_id: invitation.customer_id,
                consumed: true,
                already_consumed: true,
                affected_rows,
                consumed_at: invitation.consumed_at(),
                audited: false,
            });
        }

        let entry = AuditEntry::success(
            AUDIT_INVITATION_USED,
            json!({
                "invitation_id": invitation.id,
                "customer_id": invitation.customer_id,
                "email": invitation.email,
            }),
        );
        let audited = record_best_effort(&mut *conn, &entry, now).await;

        Ok(ConsumptionReceipt {
            invitation_id: invitation.id.clone(),
            customer_id: invitation.customer_id,
            consumed: true,
            already_consumed: false,
            affected_rows,
            consumed_at: Some(now),
            audited,
        })
    }
}
