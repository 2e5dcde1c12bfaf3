use axum::{extract::State, http::StatusCode, Json};
use shared::{LoginRequest, RefreshRequest, RegisterRequest, RegisterResponse, TokenResponse};

use crate::{error::AppError, state::AppState};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let outcome = state.accounts.complete_registration(req.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: outcome.user.to_profile(),
            identity_source: outcome.identity_source,
            tokens: outcome.credentials.to_response(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let (_, credentials) = state.accounts.login(&req.email, &req.password).await?;
    Ok(Json(credentials.to_response()))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let credentials = state.issuer.refresh(&req.refresh_token).await?;
    Ok(Json(credentials.to_response()))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    // Unknown or already revoked tokens are not an error for logout
    state.issuer.revoke(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
