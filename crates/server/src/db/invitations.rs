use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::{Database, Invitation, InvitationRow};

const INVITATION_COLUMNS: &str =
    "id, token, customer_id, email, created_at, expires_at, is_used, used, used_at";

impl Database {
    pub async fn get_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::find_invitation_by_token(&mut conn, token).await
    }

    /// Exact, case-sensitive match on the token column.
    pub async fn find_invitation_by_token(
        conn: &mut SqliteConnection,
        token: &str,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        let row = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(Invitation::from))
    }

    pub async fn insert_invitation(
        conn: &mut SqliteConnection,
        invitation: &Invitation,
    ) -> Result<(), sqlx::Error> {
        let consumed_at = invitation.consumed_at();
        let consumed = invitation.is_consumed();
        sqlx::query(
            r#"
            INSERT INTO invitations (id, token, customer_id, email, created_at, expires_at, is_used, used, used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invitation.id)
        .bind(&invitation.token)
        .bind(invitation.customer_id)
        .bind(&invitation.email)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(consumed)
        .bind(consumed)
        .bind(consumed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Flip an open invitation to consumed, writing every legacy column.
    ///
    /// The guard in the WHERE clause makes this the serialisation point: only
    /// one caller can ever see `1` for a given token.
    pub async fn mark_invitation_consumed(
        conn: &mut SqliteConnection,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET is_used = 1, used = 1, used_at = ?
            WHERE token = ? AND is_used = 0 AND used = 0 AND used_at IS NULL
            "#,
        )
        .bind(now)
        .bind(token)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
