use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{InvitationInfo, ProfileInfo};
use sqlx::FromRow;

/// Coarse role partition. Anything that is not a customer is staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Staff => "staff",
        }
    }

    /// Older rows use `admin` for staff accounts.
    pub fn from_db(value: &str) -> Self {
        match value {
            "staff" | "admin" => Role::Staff,
            _ => Role::Client,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: String,
    pub verified: bool,
    pub password_hash: Option<String>,
    pub token_version: i64,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_db(&self.role)
    }

    pub fn to_profile(&self) -> ProfileInfo {
        ProfileInfo {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            company: self.company.clone(),
            role: self.role().as_str().to_string(),
            verified: self.verified,
            last_login: self.last_login,
        }
    }
}

/// Raw invitation row, including the three legacy consumption columns.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationRow {
    pub id: String,
    pub token: String,
    pub customer_id: Option<i64>,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_used: bool,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionState {
    Open,
    /// `at` is missing for rows flagged by the old system without a timestamp.
    Consumed { at: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone)]
pub struct Invitation {
    pub id: String,
    pub token: String,
    pub customer_id: Option<i64>,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: ConsumptionState,
}

impl From<InvitationRow> for Invitation {
    fn from(row: InvitationRow) -> Self {
        let state = if row.is_used || row.used || row.used_at.is_some() {
            ConsumptionState::Consumed { at: row.used_at }
        } else {
            ConsumptionState::Open
        };

        Self {
            id: row.id,
            token: row.token,
            customer_id: row.customer_id,
            email: row.email,
            created_at: row.created_at,
            expires_at: row.expires_at,
            state,
        }
    }
}

impl Invitation {
    pub fn is_consumed(&self) -> bool {
        matches!(self.state, ConsumptionState::Consumed { .. })
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ConsumptionState::Consumed { at } => at,
            ConsumptionState::Open => None,
        }
    }

    /// Expired only when an expiry is set and lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    pub fn to_info(&self) -> InvitationInfo {
        InvitationInfo {
            id: self.id.clone(),
            token: self.token.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: i64,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Append-only audit record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: &'static str,
    pub status: &'static str,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn success(action: &'static str, details: serde_json::Value) -> Self {
        Self {
            action,
            status: "success",
            details,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub action: String,
    pub status: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}
