use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use shared::{ProfileInfo, UpdateProfileRequest, UpdateProfileResponse};

use super::authenticate;
use crate::{error::AppError, state::AppState};

pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileInfo>, AppError> {
    let claims = authenticate(&state, &headers).await?;
    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::AuthError("Malformed token subject".to_string()))?;

    let user = state.profiles.get(user_id).await?;
    Ok(Json(user.to_profile()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UpdateProfileResponse>, AppError> {
    let claims = authenticate(&state, &headers).await?;
    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::AuthError("Malformed token subject".to_string()))?;

    let outcome = state.profiles.update(user_id, req.into()).await?;
    Ok(Json(UpdateProfileResponse {
        profile: outcome.user.to_profile(),
        tokens: outcome.credentials.map(|pair| pair.to_response()),
    }))
}
