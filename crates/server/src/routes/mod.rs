use axum::{
    http::{HeaderMap, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{credentials::AccessClaims, error::AppError, state::AppState};

mod auth;
mod health;
mod invitations;
mod profile;

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Invitations
        .route(
            "/invitations/validate",
            get(invitations::validate_query).post(invitations::validate),
        )
        .route("/invitations/consume", post(invitations::consume))
        .route("/invitations", post(invitations::create))
        // Auth routes
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        // Profile
        .route("/profile", get(profile::get_profile).patch(profile::update_profile))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Verify the bearer access token on a request.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AccessClaims, AppError> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthError("Missing or invalid Authorization header".to_string()))?;

    Ok(state.issuer.authenticate(token).await?)
}
