use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqliteConnection, SqlitePool, Sqlite, Transaction,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod audit;
mod credentials;
mod invitations;
mod models;

pub use audit::record_best_effort;
pub use models::*;

const USER_COLUMNS: &str = "id, email, first_name, last_name, phone, company, role, verified, \
     password_hash, token_version, last_login";

/// Handle to the SQLite pool. Cloning is cheap; every operation checks out its
/// own connection or transaction and returns it when the guard drops.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Open a write transaction that takes the database write lock up front,
    /// so concurrent writers queue instead of failing on lock upgrade.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    // User operations
    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::find_user(&mut conn, id).await
    }

    pub async fn get_user_for_login(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE LOWER(email) = LOWER(?) AND password_hash IS NOT NULL \
             ORDER BY CASE role WHEN 'client' THEN 0 ELSE 1 END LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_user(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn find_client_by_email(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'client' AND LOWER(email) = LOWER(?)"
        ))
        .bind(email)
        .fetch_optional(conn)
        .await
    }

    /// Insert a minimal unverified client row, as the invite flow does.
    pub async fn insert_placeholder_client(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO users (email, role, verified) VALUES (?, 'client', 0)")
            .bind(email)
            .execute(conn)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_user(conn: &mut SqliteConnection, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, last_name, phone, company, role, verified, password_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id)
        .bind(user.email)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.phone)
        .bind(user.company)
        .bind(user.role.as_str())
        .bind(user.verified)
        .bind(user.password_hash)
        .execute(conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Promote an existing client row to a verified client with a password.
    /// Missing profile fields keep whatever the placeholder already had. Staff
    /// rows are never touched; the caller sees 0 affected rows.
    pub async fn activate_client(
        conn: &mut SqliteConnection,
        user: &NewUser<'_>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = COALESCE(email, ?),
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                phone = COALESCE(?, phone),
                company = COALESCE(?, company),
                verified = 1,
                password_hash = ?,
                updated_at = ?
            WHERE id = ? AND role = 'client'
            "#,
        )
        .bind(user.email)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.phone)
        .bind(user.company)
        .bind(user.password_hash)
        .bind(now)
        .bind(user.id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_profile_fields(
        conn: &mut SqliteConnection,
        user_id: i64,
        fields: &ProfileFields<'_>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = COALESCE(?, email),
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                phone = COALESCE(?, phone),
                company = COALESCE(?, company),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(fields.email)
        .bind(fields.first_name)
        .bind(fields.last_name)
        .bind(fields.phone)
        .bind(fields.company)
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Bump the token version so every access token minted before now is stale.
    pub async fn bump_token_version(conn: &mut SqliteConnection, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET token_version = token_version + 1 WHERE id = ?")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn touch_last_login(
        conn: &mut SqliteConnection,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Values for creating or activating a user row.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub id: Option<i64>,
    pub email: &'a str,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub company: Option<&'a str>,
    pub role: Role,
    pub verified: bool,
    pub password_hash: Option<&'a str>,
}

/// Editable profile fields; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields<'a> {
    pub email: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub company: Option<&'a str>,
}

/// Roll back a transaction on a failure path, logging (not propagating) a
/// rollback error so the original failure reaches the caller.
pub async fn rollback_quietly(tx: Transaction<'_, Sqlite>, operation: &'static str) {
    if let Err(e) = tx.rollback().await {
        tracing::error!(operation, error = %e, "Transaction rollback failed");
    }
}
