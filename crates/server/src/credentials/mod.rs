//! Access/refresh credential pairs: minting, rotation, refresh and revocation.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use shared::TokenResponse;
use sqlx::SqliteConnection;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::{record_best_effort, rollback_quietly, AuditEntry, Database, RefreshToken, Role};

mod tokens;

pub use tokens::{generate_refresh_token, hash_refresh_token, AccessClaims, TokenSigner};

pub const AUDIT_CREDENTIALS_ISSUED: &str = "credentials_issued";
pub const AUDIT_CREDENTIALS_ROTATED: &str = "credentials_rotated";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("refresh token is invalid, expired or revoked")]
    InvalidRefreshToken,

    #[error("access token rejected: {0}")]
    InvalidAccessToken(String),

    #[error("access token was issued for an older token version")]
    StaleAccessToken,

    #[error("failed to sign access token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Who a credential pair is minted for.
#[derive(Debug, Clone)]
pub struct SessionSubject {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub token_version: i64,
}

#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access_token: String,
    /// Raw refresh token. Only its hash is stored.
    pub refresh_token: String,
    pub refresh_token_id: String,
    pub token_version: i64,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (self.access_expires_at - self.issued_at).num_seconds(),
            refresh_expires_at: self.refresh_expires_at,
        }
    }
}

#[derive(Clone)]
pub struct CredentialIssuer {
    db: Database,
    signer: TokenSigner,
    refresh_ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(db: Database, config: &AuthConfig) -> Self {
        Self {
            db,
            signer: TokenSigner::new(
                &config.jwt_secret,
                Duration::minutes(config.access_token_ttl_minutes),
            ),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
        }
    }

    /// Mint a pair in its own transaction.
    #[tracing::instrument(skip(self, email))]
    pub async fn issue(
        &self,
        user_id: i64,
        email: &str,
        role: Role,
        token_version: i64,
    ) -> Result<CredentialPair, CredentialError> {
        let subject = SessionSubject {
            user_id,
            email: email.to_string(),
            role,
            token_version,
        };

        let mut tx = self.db.begin_write().await?;
        match self.issue_in(&mut tx, &subject, Utc::now()).await {
            Ok(pair) => {
                tx.commit().await?;
                Ok(pair)
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Credential issuance failed, rolling back");
                rollback_quietly(tx, "issue_credentials").await;
                Err(e)
            }
        }
    }

    /// Mint a pair inside the caller's transaction and persist the refresh
    /// token hash there.
    pub async fn issue_in(
        &self,
        conn: &mut SqliteConnection,
        subject: &SessionSubject,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, CredentialError> {
        let (access_token, access_expires_at) = self
            .signer
            .sign(subject.user_id, &subject.email, subject.role, subject.token_version, now)
            .map_err(CredentialError::Signing)?;

        let refresh_token = generate_refresh_token();
        let stored = RefreshToken {
            id: Uuid::new_v4().to_string(),
            user_id: subject.user_id,
            token_hash: hash_refresh_token(&refresh_token),
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            revoked: false,
            revoked_at: None,
        };
        Database::insert_refresh_token(&mut *conn, &stored).await?;

        let entry = AuditEntry::success(
            AUDIT_CREDENTIALS_ISSUED,
            json!({ "user_id": subject.user_id, "refresh_token_id": stored.id }),
        );
        record_best_effort(&mut *conn, &entry, now).await;

        tracing::debug!(user_id = subject.user_id, refresh_token_id = %stored.id, "Credentials issued");

        Ok(CredentialPair {
            access_token,
            refresh_token,
            refresh_token_id: stored.id,
            token_version: subject.token_version,
            issued_at: now,
            access_expires_at,
            refresh_expires_at: stored.expires_at,
        })
    }

    /// Invalidate everything issued so far for the user and mint a new pair.
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self, user_id: i64) -> Result<CredentialPair, CredentialError> {
        let mut tx = self.db.begin_write().await?;
        match self.rotate_in(&mut tx, user_id, Utc::now()).await {
            Ok(pair) => {
                tx.commit().await?;
                Ok(pair)
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Credential rotation failed, rolling back");
                rollback_quietly(tx, "rotate_credentials").await;
                Err(e)
            }
        }
    }

    /// Rotation inside the caller's transaction: bump the token version,
    /// revoke every active refresh token, then mint a fresh pair. Any error
    /// leaves the caller to roll back its own changes with these.
    pub async fn rotate_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, CredentialError> {
        if Database::bump_token_version(&mut *conn, user_id).await? == 0 {
            return Err(CredentialError::UserNotFound(user_id));
        }
        let revoked = Database::revoke_user_refresh_tokens(&mut *conn, user_id, now).await?;

        let user = Database::find_user(&mut *conn, user_id)
            .await?
            .ok_or(CredentialError::UserNotFound(user_id))?;

        let subject = SessionSubject {
            user_id,
            email: user.email.clone().unwrap_or_default(),
            role: user.role(),
            token_version: user.token_version,
        };
        let pair = self.issue_in(&mut *conn, &subject, now).await?;

        let entry = AuditEntry::success(
            AUDIT_CREDENTIALS_ROTATED,
            json!({
                "user_id": user_id,
                "revoked_refresh_tokens": revoked,
                "token_version": user.token_version,
            }),
        );
        record_best_effort(&mut *conn, &entry, now).await;

        tracing::info!(user_id, revoked, token_version = user.token_version, "Credentials rotated");
        Ok(pair)
    }

    /// Exchange an active refresh token for a new pair. The presented token is
    /// revoked in the same transaction.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<CredentialPair, CredentialError> {
        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;
        match self.refresh_in(&mut tx, raw_refresh_token, now).await {
            Ok(pair) => {
                tx.commit().await?;
                Ok(pair)
            }
            Err(e) => {
                rollback_quietly(tx, "refresh_credentials").await;
                Err(e)
            }
        }
    }

    async fn refresh_in(
        &self,
        conn: &mut SqliteConnection,
        raw_refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, CredentialError> {
        let stored = Database::find_refresh_token_by_hash(&mut *conn, &hash_refresh_token(raw_refresh_token))
            .await?
            .filter(|token| token.is_active_at(now))
            .ok_or(CredentialError::InvalidRefreshToken)?;

        if Database::revoke_refresh_token(&mut *conn, &stored.id, now).await? == 0 {
            return Err(CredentialError::InvalidRefreshToken);
        }

        let user = Database::find_user(&mut *conn, stored.user_id)
            .await?
            .ok_or(CredentialError::UserNotFound(stored.user_id))?;

        let subject = SessionSubject {
            user_id: user.id,
            email: user.email.clone().unwrap_or_default(),
            role: user.role(),
            token_version: user.token_version,
        };
        self.issue_in(&mut *conn, &subject, now).await
    }

    /// Revoke a refresh token (logout). Returns false when it was unknown or
    /// already revoked.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, raw_refresh_token: &str) -> Result<bool, CredentialError> {
        let now = Utc::now();
        let mut tx = self.db.begin_write().await?;

        let revoked = match Database::find_refresh_token_by_hash(&mut tx, &hash_refresh_token(raw_refresh_token)).await {
            Ok(Some(stored)) => Database::revoke_refresh_token(&mut tx, &stored.id, now).await,
            Ok(None) => Ok(0),
            Err(e) => Err(e),
        };

        match revoked {
            Ok(count) => {
                tx.commit().await?;
                Ok(count > 0)
            }
            Err(e) => {
                rollback_quietly(tx, "revoke_refresh_token").await;
                Err(e.into())
            }
        }
    }

    /// Verify an access token against the signature, its expiry and the
    /// user's current token version.
    pub async fn authenticate(&self, access_token: &str) -> Result<AccessClaims, CredentialError> {
        let claims = self
            .signer
            .verify(access_token)
            .map_err(|e| CredentialError::InvalidAccessToken(e.to_string()))?;

        let user_id = claims
            .user_id()
            .ok_or_else(|| CredentialError::InvalidAccessToken("malformed subject".to_string()))?;

        let user = self
            .db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| CredentialError::InvalidAccessToken("unknown subject".to_string()))?;

        if user.token_version != claims.ver {
            tracing::debug!(user_id, presented = claims.ver, current = user.token_version, "Stale access token");
            return Err(CredentialError::StaleAccessToken);
        }
        Ok(claims)
    }
}
