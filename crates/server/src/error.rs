use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::ErrorBody;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::credentials::CredentialError;
use crate::invitation::{ConsumptionError, IssueError, ValidationError};
use crate::profile::ProfileError;

/// Closed taxonomy of invitation outcomes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidToken,
    TokenAlreadyUsed,
    TokenExpired,
    InvalidInvitation,
    Storage,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::TokenAlreadyUsed => "token_used",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::InvalidInvitation => "invalid_invitation",
            ErrorKind::Storage => "database_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidToken => StatusCode::NOT_FOUND,
            ErrorKind::TokenAlreadyUsed => StatusCode::CONFLICT,
            ErrorKind::TokenExpired => StatusCode::GONE,
            ErrorKind::InvalidInvitation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    AuthError(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Invitation {
        kind: ErrorKind,
        message: String,
        customer_id: Option<i64>,
        customer_email: Option<String>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn invitation(kind: ErrorKind, message: impl Into<String>) -> Self {
        AppError::Invitation {
            kind,
            message: message.into(),
            customer_id: None,
            customer_email: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(ErrorKind::Validation.code(), msg),
            ),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, ErrorBody::new("unauthorized", msg)),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorBody::new("forbidden", msg)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorBody::new("conflict", msg)),
            AppError::Invitation {
                kind,
                message,
                customer_id,
                customer_email,
            } => {
                let mut body = ErrorBody::new(kind.code(), message);
                if kind == ErrorKind::TokenAlreadyUsed {
                    body = body.with_customer(customer_id, customer_email);
                }
                (kind.status(), body)
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new(ErrorKind::Storage.code(), "A database error occurred"),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal_error", "Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        let kind = err.kind();
        match err {
            ValidationError::TokenAlreadyUsed {
                customer_id,
                customer_email,
            } => AppError::Invitation {
                kind,
                message: "This invitation has already been used".to_string(),
                customer_id,
                customer_email: Some(customer_email),
            },
            ValidationError::Storage(e) => AppError::Database(e),
            other => AppError::invitation(kind, other.to_string()),
        }
    }
}

impl From<ConsumptionError> for AppError {
    fn from(err: ConsumptionError) -> Self {
        match err {
            ConsumptionError::Storage(e) => AppError::Database(e),
            other => AppError::invitation(other.kind(), other.to_string()),
        }
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::InvalidExpiry(_) => AppError::BadRequest(err.to_string()),
            IssueError::StaffCustomer(_) => AppError::invitation(ErrorKind::InvalidInvitation, err.to_string()),
            IssueError::Storage(e) => AppError::Database(e),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::UserNotFound(_) => AppError::NotFound(err.to_string()),
            CredentialError::InvalidRefreshToken
            | CredentialError::InvalidAccessToken(_)
            | CredentialError::StaleAccessToken => AppError::AuthError(err.to_string()),
            CredentialError::Signing(e) => AppError::Internal(e.to_string()),
            CredentialError::Storage(e) => AppError::Database(e),
        }
    }
}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::NotFound(_) => AppError::NotFound(err.to_string()),
            ProfileError::EmailTaken(_) => AppError::Conflict(err.to_string()),
            ProfileError::Invalid(msg) => AppError::BadRequest(msg),
            ProfileError::Credentials(e) => e.into(),
            ProfileError::Storage(e) => AppError::Database(e),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Invitation(e) => e.into(),
            AccountError::WeakPassword(_) => AppError::BadRequest(err.to_string()),
            AccountError::EmailTaken(_) => AppError::Conflict(err.to_string()),
            AccountError::InvalidCredentials => AppError::AuthError(err.to_string()),
            AccountError::Credentials(e) => e.into(),
            AccountError::PasswordHash(msg) => AppError::Internal(msg),
            AccountError::Storage(e) => AppError::Database(e),
        }
    }
}
