//! Registration completion from an invitation, password login and staff
//! bootstrap.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use shared::{IdentitySource, RegisterRequest};
use sqlx::SqliteConnection;
use std::sync::Arc;
use thiserror::Error;

use crate::credentials::{CredentialError, CredentialIssuer, CredentialPair, SessionSubject};
use crate::db::{rollback_quietly, Database, NewUser, Role, User};
use crate::invitation::{
    ConsumptionError, ConsumptionReceipt, InvitationConsumer, InvitationValidator, ValidationError,
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Invitation(#[from] ValidationError),

    #[error("password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("email {0} is already registered")]
    EmailTaken(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<ConsumptionError> for AccountError {
    fn from(err: ConsumptionError) -> Self {
        match err {
            ConsumptionError::EmptyToken => AccountError::Invitation(ValidationError::EmptyToken),
            ConsumptionError::InvalidToken => AccountError::Invitation(ValidationError::InvalidToken),
            ConsumptionError::Storage(e) => AccountError::Storage(e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompleteRegistration {
    pub token: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl From<RegisterRequest> for CompleteRegistration {
    fn from(req: RegisterRequest) -> Self {
        Self {
            token: req.token,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
            company: req.company,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub user: User,
    pub credentials: CredentialPair,
    pub identity_source: IdentitySource,
    pub consumption: ConsumptionReceipt,
}

#[derive(Clone)]
pub struct AccountService {
    db: Database,
    validator: Arc<InvitationValidator>,
    issuer: CredentialIssuer,
    min_password_length: usize,
}

impl AccountService {
    pub fn new(
        db: Database,
        validator: Arc<InvitationValidator>,
        issuer: CredentialIssuer,
        min_password_length: usize,
    ) -> Self {
        Self {
            db,
            validator,
            issuer,
            min_password_length,
        }
    }

    /// Turn an open invitation into a registered, verified client with a live
    /// session. User activation, consumption and credential issuance commit
    /// together or not at all.
    #[tracing::instrument(skip_all)]
    pub async fn complete_registration(
        &self,
        req: CompleteRegistration,
    ) -> Result<RegistrationOutcome, AccountError> {
        self.check_password(&req.password)?;
        let password_hash = hash_password(&req.password)?;

        let mut tx = self.db.begin_write().await?;
        match self.register_in(&mut tx, &req, &password_hash, Utc::now()).await {
            Ok(outcome) => {
                tx.commit().await?;
                tracing::info!(
                    user_id = outcome.user.id,
                    source = outcome.identity_source.as_str(),
                    "Registration completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                match &e {
                    AccountError::Storage(_) | AccountError::Credentials(_) => {
                        tracing::error!(error = %e, "Registration failed, rolling back")
                    }
                    _ => tracing::info!(error = %e, "Registration rejected"),
                }
                rollback_quietly(tx, "complete_registration").await;
                Err(e)
            }
        }
    }

    async fn register_in(
        &self,
        conn: &mut SqliteConnection,
        req: &CompleteRegistration,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RegistrationOutcome, AccountError> {
        let resolved = self.validator.validate_in(&mut *conn, &req.token, now).await?;
        let customer = &resolved.customer;

        if let Some(other) = Database::find_client_by_email(&mut *conn, &customer.email).await? {
            if other.id != customer.id {
                return Err(AccountError::EmailTaken(customer.email.clone()));
            }
        }

        let new_user = NewUser {
            id: Some(customer.id),
            email: &customer.email,
            first_name: req.first_name.as_deref().or(customer.first_name.as_deref()),
            last_name: req.last_name.as_deref().or(customer.last_name.as_deref()),
            phone: req.phone.as_deref(),
            company: req.company.as_deref(),
            role: Role::Client,
            verified: true,
            password_hash: Some(password_hash),
        };

        match Database::find_user(&mut *conn, customer.id).await? {
            Some(_) => {
                if Database::activate_client(&mut *conn, &new_user, now).await? == 0 {
                    return Err(ValidationError::InvalidInvitation {
                        invitation_id: resolved.invitation.id.clone(),
                    }
                    .into());
                }
            }
            None => {
                Database::insert_user(&mut *conn, &new_user).await?;
            }
        }

        let consumption = InvitationConsumer::consume_in(&mut *conn, &req.token, now).await?;
        if consumption.already_consumed {
            return Err(ValidationError::TokenAlreadyUsed {
                customer_id: resolved.invitation.customer_id,
                customer_email: resolved.invitation.email.clone(),
            }
            .into());
        }

        // Registration signs the customer in.
        Database::touch_last_login(&mut *conn, customer.id, now).await?;

        let user = Database::find_user(&mut *conn, customer.id)
            .await?
            .ok_or(AccountError::Storage(sqlx::Error::RowNotFound))?;

        let subject = SessionSubject {
            user_id: user.id,
            email: customer.email.clone(),
            role: Role::Client,
            token_version: user.token_version,
        };
        let credentials = self.issuer.issue_in(&mut *conn, &subject, now).await?;

        Ok(RegistrationOutcome {
            user,
            credentials,
            identity_source: resolved.source,
            consumption,
        })
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, CredentialPair), AccountError> {
        let user = self
            .db
            .get_user_for_login(email.trim())
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        let stored_hash = user.password_hash.as_deref().ok_or(AccountError::InvalidCredentials)?;
        if !verify_password(password, stored_hash)? || !user.verified {
            return Err(AccountError::InvalidCredentials);
        }

        let subject = SessionSubject {
            user_id: user.id,
            email: user.email.clone().unwrap_or_default(),
            role: user.role(),
            token_version: user.token_version,
        };
        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;
        let credentials = match self.sign_in(&mut tx, &subject, now).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(user_id = user.id, error = %e, "Login failed, rolling back");
                rollback_quietly(tx, "login").await;
                return Err(e);
            }
        };
        tx.commit().await?;
        let user = User {
            last_login: Some(now),
            ..user
        };

        tracing::info!(user_id = user.id, "User logged in");
        Ok((user, credentials))
    }

    async fn sign_in(
        &self,
        conn: &mut SqliteConnection,
        subject: &SessionSubject,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, AccountError> {
        let credentials = self.issuer.issue_in(&mut *conn, subject, now).await?;
        Database::touch_last_login(&mut *conn, subject.user_id, now).await?;
        Ok(credentials)
    }

    /// Create a verified staff account. Used by the operator command line.
    pub async fn create_staff(
        &self,
        email: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User, AccountError> {
        self.check_password(password)?;
        let password_hash = hash_password(password)?;

        let new_user = NewUser {
            id: None,
            email,
            first_name,
            last_name,
            phone: None,
            company: None,
            role: Role::Staff,
            verified: true,
            password_hash: Some(&password_hash),
        };

        let mut tx = self.db.begin_write().await?;
        let user_id = match Database::insert_user(&mut tx, &new_user).await {
            Ok(id) => id,
            Err(e) => {
                rollback_quietly(tx, "create_staff").await;
                return Err(e.into());
            }
        };
        tx.commit().await?;

        tracing::info!(user_id, "Staff account created");
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or(AccountError::Storage(sqlx::Error::RowNotFound))
    }

    fn check_password(&self, password: &str) -> Result<(), AccountError> {
        if password.chars().count() < self.min_password_length {
            return Err(AccountError::WeakPassword(self.min_password_length));
        }
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AccountError> {
    let parsed_hash =
        PasswordHash::new(stored_hash).map_err(|e| AccountError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct-horse").unwrap();
        assert!(verify_password("correct-horse", &hash).unwrap());
        assert!(!verify_password("wrong-horse", &hash).unwrap());
    }

    #[test]
    fn consumption_errors_map_to_invitation_errors() {
        let err: AccountError = ConsumptionError::InvalidToken.into();
        assert!(matches!(err, AccountError::Invitation(ValidationError::InvalidToken)));
    }
}
