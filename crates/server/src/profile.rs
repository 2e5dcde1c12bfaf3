//! Non-sensitive profile fields. Changing the email rotates the session
//! credentials in the same transaction.

use chrono::{DateTime, Utc};
use shared::UpdateProfileRequest;
use sqlx::SqliteConnection;
use thiserror::Error;

use crate::credentials::{CredentialError, CredentialIssuer, CredentialPair};
use crate::db::{rollback_quietly, Database, ProfileFields, Role, User};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("user {0} not found")]
    NotFound(i64),

    #[error("email {0} is already registered")]
    EmailTaken(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(req: UpdateProfileRequest) -> Self {
        Self {
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
            company: req.company,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileUpdateOutcome {
    pub user: User,
    /// Set when the email changed beyond casing and the session was rotated
    pub credentials: Option<CredentialPair>,
}

#[derive(Clone)]
pub struct ProfileService {
    db: Database,
    issuer: CredentialIssuer,
}

impl ProfileService {
    pub fn new(db: Database, issuer: CredentialIssuer) -> Self {
        Self { db, issuer }
    }

    pub async fn get(&self, user_id: i64) -> Result<User, ProfileError> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or(ProfileError::NotFound(user_id))
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, user_id: i64, update: ProfileUpdate) -> Result<ProfileUpdateOutcome, ProfileError> {
        let email = match update.email.as_deref().map(str::trim) {
            Some("") => return Err(ProfileError::Invalid("email must not be empty".to_string())),
            Some(email) if !email.contains('@') => {
                return Err(ProfileError::Invalid(format!("{} is not a valid email", email)))
            }
            other => other.map(str::to_string),
        };
        let update = ProfileUpdate { email, ..update };

        let mut tx = self.db.begin_write().await?;
        match self.update_in(&mut tx, user_id, &update, Utc::now()).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if matches!(e, ProfileError::Storage(_) | ProfileError::Credentials(_)) {
                    tracing::error!(user_id, error = %e, "Profile update failed, rolling back");
                }
                rollback_quietly(tx, "update_profile").await;
                Err(e)
            }
        }
    }

    async fn update_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<ProfileUpdateOutcome, ProfileError> {
        let current = Database::find_user(&mut *conn, user_id)
            .await?
            .ok_or(ProfileError::NotFound(user_id))?;

        // A casing-only change is written but is not an identity change.
        let written_email = update
            .email
            .as_deref()
            .filter(|email| current.email.as_deref() != Some(*email));
        let changed_email = written_email.filter(|email| {
            current
                .email
                .as_deref()
                .map_or(true, |existing| !existing.eq_ignore_ascii_case(email))
        });

        if let Some(email) = changed_email {
            if current.role() == Role::Client {
                if let Some(other) = Database::find_client_by_email(&mut *conn, email).await? {
                    if other.id != user_id {
                        return Err(ProfileError::EmailTaken(email.to_string()));
                    }
                }
            }
        }

        let fields = ProfileFields {
            email: written_email,
            first_name: update.first_name.as_deref(),
            last_name: update.last_name.as_deref(),
            phone: update.phone.as_deref(),
            company: update.company.as_deref(),
        };
        Database::update_profile_fields(&mut *conn, user_id, &fields, now).await?;

        let credentials = match changed_email {
            Some(_) => Some(self.issuer.rotate_in(&mut *conn, user_id, now).await?),
            None => None,
        };

        let user = Database::find_user(&mut *conn, user_id)
            .await?
            .ok_or(ProfileError::NotFound(user_id))?;

        Ok(ProfileUpdateOutcome { user, credentials })
    }
}
