//! Invitation tokens: issuing, validating and consuming them.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::SqliteConnection;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{rollback_quietly, ConsumptionState, Database, Invitation, Role};

mod consumer;
mod identity;
mod validator;

pub use consumer::{ConsumptionError, ConsumptionReceipt, InvitationConsumer, AUDIT_INVITATION_USED};
pub use identity::{
    default_lookups, CustomerIdentity, CustomerRecord, IdentityLookup, LegacyCustomerLookup,
    PrimaryUserLookup,
};
pub use validator::{InvitationValidator, ResolvedInvitation, ValidationError};

pub const TOKEN_LENGTH: usize = 48;

/// High-entropy alphanumeric invitation token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Short prefix for log fields; full tokens never reach the logs.
pub(crate) fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}…", prefix)
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("expires_in_hours must be a positive number of hours that fits the calendar, got {0}")]
    InvalidExpiry(i64),

    #[error("user {0} is a staff account and cannot be invited")]
    StaffCustomer(i64),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    /// Existing customer to invite. When absent the client with this email is
    /// reused, or a placeholder row is created for it.
    pub customer_id: Option<i64>,
    pub expires_in_hours: i64,
}

/// Expiry `hours` after `now`, or `None` when it is not positive or overflows.
fn expiry_after(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    if hours <= 0 {
        return None;
    }
    now.checked_add_signed(Duration::try_hours(hours)?)
}

/// Issue a new invitation for a customer.
#[tracing::instrument(skip(db), fields(email = %req.email))]
pub async fn create_invitation(db: &Database, req: NewInvitation) -> Result<Invitation, IssueError> {
    let now = Utc::now();
    let expires_at =
        expiry_after(now, req.expires_in_hours).ok_or(IssueError::InvalidExpiry(req.expires_in_hours))?;

    let mut tx = db.begin_write().await?;
    let customer_id = match resolve_customer(&mut tx, &req).await {
        Ok(id) => id,
        Err(e) => {
            rollback_quietly(tx, "create_invitation").await;
            return Err(e);
        }
    };

    let invitation = Invitation {
        id: Uuid::new_v4().to_string(),
        token: generate_token(),
        customer_id: Some(customer_id),
        email: req.email,
        created_at: now,
        expires_at: Some(expires_at),
        state: ConsumptionState::Open,
    };

    if let Err(e) = Database::insert_invitation(&mut tx, &invitation).await {
        rollback_quietly(tx, "create_invitation").await;
        return Err(e.into());
    }
    tx.commit().await?;

    tracing::info!(
        invitation_id = %invitation.id,
        customer_id,
        "Invitation created"
    );
    Ok(invitation)
}

async fn resolve_customer(conn: &mut SqliteConnection, req: &NewInvitation) -> Result<i64, IssueError> {
    match req.customer_id {
        Some(id) => match Database::find_user(&mut *conn, id).await? {
            Some(user) if user.role() != Role::Client => Err(IssueError::StaffCustomer(id)),
            _ => Ok(id),
        },
        None => match Database::find_client_by_email(&mut *conn, &req.email).await? {
            Some(user) => Ok(user.id),
            None => Ok(Database::insert_placeholder_client(&mut *conn, &req.email).await?),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_rejects_non_positive_and_overflowing_hours() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 24), Some(now + Duration::hours(24)));
        assert_eq!(expiry_after(now, 0), None);
        assert_eq!(expiry_after(now, -5), None);
        assert_eq!(expiry_after(now, 10_000_000_000), None);
        assert_eq!(expiry_after(now, i64::MAX), None);
    }

    #[test]
    fn redact_keeps_only_a_prefix() {
        assert_eq!(redact("abc123xyz"), "abc1…");
        assert_eq!(redact("ab"), "ab…");
    }
}
