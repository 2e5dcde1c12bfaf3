use chrono::{DateTime, Utc};
use shared::IdentitySource;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::identity::{default_lookups, CustomerIdentity, IdentityLookup};
use super::redact;
use crate::db::{Database, Invitation, Role};
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invitation token must not be empty")]
    EmptyToken,

    #[error("invitation token not found")]
    InvalidToken,

    #[error("invitation token has already been used")]
    TokenAlreadyUsed {
        customer_id: Option<i64>,
        customer_email: String,
    },

    #[error("invitation token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    #[error("invitation {invitation_id} does not reference a customer")]
    InvalidInvitation { invitation_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::EmptyToken => ErrorKind::Validation,
            ValidationError::InvalidToken => ErrorKind::InvalidToken,
            ValidationError::TokenAlreadyUsed { .. } => ErrorKind::TokenAlreadyUsed,
            ValidationError::TokenExpired { .. } => ErrorKind::TokenExpired,
            ValidationError::InvalidInvitation { .. } => ErrorKind::InvalidInvitation,
            ValidationError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// A valid, open invitation together with the customer it belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedInvitation {
    pub invitation: Invitation,
    pub customer: CustomerIdentity,
    /// Informational only; callers must not branch on it.
    pub source: IdentitySource,
}

/// Read-only check of an invitation token.
pub struct InvitationValidator {
    db: Database,
    lookups: Vec<Box<dyn IdentityLookup>>,
}

impl InvitationValidator {
    pub fn new(db: Database) -> Self {
        Self::with_lookups(db, default_lookups())
    }

    pub fn with_lookups(db: Database, lookups: Vec<Box<dyn IdentityLookup>>) -> Self {
        Self { db, lookups }
    }

    pub async fn validate(&self, token: &str) -> Result<ResolvedInvitation, ValidationError> {
        self.validate_at(token, Utc::now()).await
    }

    #[tracing::instrument(skip(self, token), fields(token = %redact(token)))]
    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedInvitation, ValidationError> {
        if token.trim().is_empty() {
            return Err(ValidationError::EmptyToken);
        }

        let mut conn = self.db.pool().acquire().await?;
        let result = self.validate_in(&mut conn, token, now).await;

        match &result {
            Ok(resolved) => tracing::info!(
                invitation_id = %resolved.invitation.id,
                customer_id = resolved.customer.id,
                source = resolved.source.as_str(),
                "Invitation validated"
            ),
            Err(ValidationError::Storage(e)) => {
                tracing::error!(error = %e, "Invitation validation hit a storage error")
            }
            Err(e) => tracing::info!(outcome = e.kind().code(), "Invitation rejected"),
        }
        result
    }

    /// Validate on a caller-supplied connection, e.g. inside a write transaction.
    ///
    /// Checks run in a fixed order: existence, consumption, expiry, customer
    /// reference (missing, zero or a staff account). A used token therefore
    /// reports "used" even when it has also expired.
    pub async fn validate_in(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedInvitation, ValidationError> {
        if token.trim().is_empty() {
            return Err(ValidationError::EmptyToken);
        }

        let invitation = Database::find_invitation_by_token(&mut *conn, token)
            .await?
            .ok_or(ValidationError::InvalidToken)?;

        if invitation.is_consumed() {
            return Err(ValidationError::TokenAlreadyUsed {
                customer_id: invitation.customer_id,
                customer_email: invitation.email.clone(),
            });
        }

        if let Some(expired_at) = invitation.expires_at.filter(|_| invitation.is_expired_at(now)) {
            return Err(ValidationError::TokenExpired { expired_at });
        }

        let customer_id = match invitation.customer_id {
            Some(id) if id != 0 => id,
            _ => {
                return Err(ValidationError::InvalidInvitation {
                    invitation_id: invitation.id.clone(),
                })
            }
        };

        // Invitations only ever address customers.
        if let Some(user) = Database::find_user(&mut *conn, customer_id).await? {
            if user.role() != Role::Client {
                tracing::warn!(
                    customer_id,
                    invitation_id = %invitation.id,
                    "Invitation references a staff account"
                );
                return Err(ValidationError::InvalidInvitation {
                    invitation_id: invitation.id.clone(),
                });
            }
        }

        for lookup in &self.lookups {
            if let Some(record) = lookup.lookup(&mut *conn, customer_id).await? {
                let customer = CustomerIdentity::from_record(record, &invitation.email);
                return Ok(ResolvedInvitation {
                    invitation,
                    customer,
                    source: lookup.source(),
                });
            }
        }

        tracing::warn!(
            customer_id,
            invitation_id = %invitation.id,
            "Customer not found in any identity table, using invitation email"
        );
        let customer = CustomerIdentity::synthesized(customer_id, &invitation.email);
        Ok(ResolvedInvitation {
            invitation,
            customer,
            source: IdentitySource::Synthesized,
        })
    }
}
