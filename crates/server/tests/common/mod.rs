#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use chrono::{DateTime, Duration, Utc};
use charter_server::{config::Config, db::Database, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const STAFF_PASSWORD: &str = "staff-password-1";

/// Fresh migrated database in a temp directory. Keep the context alive for
/// the duration of the test; dropping it deletes the database file.
pub struct TestContext {
    pub db: Database,
    pub state: AppState,
    _dir: TempDir,
}

impl TestContext {
    pub fn router(&self) -> Router {
        charter_server::create_router(self.state.clone())
    }
}

pub async fn setup() -> TestContext {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("charter-test.db");

    let mut config = Config::default();
    config.database.path = path.to_string_lossy().into_owned();
    config.auth.jwt_secret = TEST_SECRET.to_string();

    let db = Database::new(&config.database.path)
        .await
        .expect("Failed to open test database");
    db.run_migrations().await.expect("Failed to run migrations");

    let state = AppState::new(db.clone(), config);
    TestContext {
        db,
        state,
        _dir: dir,
    }
}

/// Raw invitation row, including the legacy consumption columns.
pub struct InvitationSeed<'a> {
    pub token: &'a str,
    pub customer_id: Option<i64>,
    pub email: &'a str,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_used: bool,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl<'a> InvitationSeed<'a> {
    pub fn open(token: &'a str, customer_id: i64, email: &'a str) -> Self {
        Self {
            token,
            customer_id: Some(customer_id),
            email,
            expires_at: Some(Utc::now() + Duration::days(7)),
            is_used: false,
            used: false,
            used_at: None,
        }
    }
}

pub async fn seed_invitation(db: &Database, seed: InvitationSeed<'_>) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO invitations (id, token, customer_id, email, created_at, expires_at, is_used, used, used_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(seed.token)
    .bind(seed.customer_id)
    .bind(seed.email)
    .bind(Utc::now() - Duration::days(1))
    .bind(seed.expires_at)
    .bind(seed.is_used)
    .bind(seed.used)
    .bind(seed.used_at)
    .execute(db.pool())
    .await
    .expect("Failed to seed invitation");
    id
}

pub async fn seed_client(db: &Database, id: i64, email: &str, first_name: &str, last_name: &str) {
    sqlx::query(
        "INSERT INTO users (id, email, first_name, last_name, role, verified) VALUES (?, ?, ?, ?, 'client', 0)",
    )
    .bind(id)
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .execute(db.pool())
    .await
    .expect("Failed to seed client");
}

pub async fn seed_legacy_customer(db: &Database, id: i64, email: &str, first_name: &str, last_name: &str) {
    sqlx::query("INSERT INTO legacy_customers (id, email, first_name, last_name) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .execute(db.pool())
        .await
        .expect("Failed to seed legacy customer");
}

pub async fn drop_table(db: &Database, table: &str) {
    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(db.pool())
        .await
        .expect("Failed to drop table");
}

pub async fn count_audit_rows(db: &Database, action: &str) -> usize {
    db.list_audit_logs(action)
        .await
        .expect("Failed to list audit logs")
        .len()
}

/// Send a JSON request through the router and return status plus parsed body.
pub async fn send_json(
    router: Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (axum::http::StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
