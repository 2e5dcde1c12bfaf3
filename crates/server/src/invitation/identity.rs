//! Ordered customer-identity lookups used while resolving an invitation.

use async_trait::async_trait;
use shared::{CustomerInfo, IdentitySource};
use sqlx::{FromRow, SqliteConnection};

/// A row returned by one of the identity tables. Placeholder rows may lack an
/// email, in which case the invitation's email is used.
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRecord {
    pub id: i64,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl CustomerIdentity {
    pub fn from_record(record: CustomerRecord, invitation_email: &str) -> Self {
        let email = record
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| invitation_email.to_string());

        Self {
            id: record.id,
            email,
            first_name: record.first_name,
            last_name: record.last_name,
        }
    }

    /// Identity built from the invitation alone when no table has the customer.
    pub fn synthesized(customer_id: i64, invitation_email: &str) -> Self {
        Self {
            id: customer_id,
            email: invitation_email.to_string(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn to_info(&self) -> CustomerInfo {
        CustomerInfo {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// One place a customer identity may live.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    fn source(&self) -> IdentitySource;

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        customer_id: i64,
    ) -> Result<Option<CustomerRecord>, sqlx::Error>;
}

/// The `users` table.
pub struct PrimaryUserLookup;

#[async_trait]
impl IdentityLookup for PrimaryUserLookup {
    fn source(&self) -> IdentitySource {
        IdentitySource::Primary
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        customer_id: i64,
    ) -> Result<Option<CustomerRecord>, sqlx::Error> {
        sqlx::query_as::<_, CustomerRecord>(
            "SELECT id, email, first_name, last_name FROM users WHERE id = ?",
        )
        .bind(customer_id)
        .fetch_optional(conn)
        .await
    }
}

/// Customers carried over from the previous booking system.
pub struct LegacyCustomerLookup;

#[async_trait]
impl IdentityLookup for LegacyCustomerLookup {
    fn source(&self) -> IdentitySource {
        IdentitySource::Fallback
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        customer_id: i64,
    ) -> Result<Option<CustomerRecord>, sqlx::Error> {
        sqlx::query_as::<_, CustomerRecord>(
            "SELECT id, email, first_name, last_name FROM legacy_customers WHERE id = ?",
        )
        .bind(customer_id)
        .fetch_optional(conn)
        .await
    }
}

/// Primary table first, then the legacy table.
pub fn default_lookups() -> Vec<Box<dyn IdentityLookup>> {
    vec![Box::new(PrimaryUserLookup), Box::new(LegacyCustomerLookup)]
}
