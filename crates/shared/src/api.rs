use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Invitations
// ============================================================================

/// Public fields of an invitation. The consumption flags stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationInfo {
    pub id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Minimal customer identity resolved from an invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Which lookup produced the customer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Row found in the primary `users` table
    Primary,
    /// Row found in the legacy customer table
    Fallback,
    /// No row anywhere; built from the invitation's own email
    Synthesized,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Primary => "primary",
            IdentitySource::Fallback => "fallback",
            IdentitySource::Synthesized => "synthesized",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateInvitationRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateInvitationResponse {
    pub valid: bool,
    pub invitation: InvitationInfo,
    pub customer: CustomerInfo,
    pub identity_source: IdentitySource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeInvitationRequest {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeInvitationResponse {
    pub consumed: bool,
    pub already_consumed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvitationResponse {
    pub customer_id: i64,
    pub invitation: InvitationInfo,
}

// ============================================================================
// Accounts and sessions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub token: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: ProfileInfo,
    pub identity_source: IdentitySource,
    pub tokens: TokenResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Credential pair handed to the client. The refresh token appears here once
/// and is never retrievable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

// ============================================================================
// Profile
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub id: i64,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: String,
    pub verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfileResponse {
    pub profile: ProfileInfo,
    /// Present only when the update rotated the session credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenResponse>,
}

// ============================================================================
// Errors
// ============================================================================

/// Uniform error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `token_used`
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            customer_id: None,
            customer_email: None,
        }
    }

    pub fn with_customer(mut self, customer_id: Option<i64>, customer_email: Option<String>) -> Self {
        self.customer_id = customer_id;
        self.customer_email = customer_email;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
