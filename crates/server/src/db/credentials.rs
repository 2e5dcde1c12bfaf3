use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::{Database, RefreshToken};

const REFRESH_COLUMNS: &str = "id, user_id, token_hash, issued_at, expires_at, revoked, revoked_at";

impl Database {
    pub async fn get_refresh_token_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::find_refresh_token_by_hash(&mut conn, token_hash).await
    }

    pub async fn list_refresh_tokens(&self, user_id: i64) -> Result<Vec<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE user_id = ? ORDER BY issued_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn find_refresh_token_by_hash(
        conn: &mut SqliteConnection,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = ?"
        ))
        .bind(token_hash)
        .fetch_optional(conn)
        .await
    }

    pub async fn insert_refresh_token(
        conn: &mut SqliteConnection,
        token: &RefreshToken,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, issued_at, expires_at, revoked, revoked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.revoked)
        .bind(token.revoked_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Revoke one refresh token. Returns 0 when it was already revoked.
    pub async fn revoke_refresh_token(
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every refresh token of a user. Rows are kept for audit.
    pub async fn revoke_user_refresh_tokens(
        conn: &mut SqliteConnection,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
