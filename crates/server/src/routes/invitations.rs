use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use shared::{
    ConsumeInvitationRequest, ConsumeInvitationResponse, CreateInvitationRequest,
    CreateInvitationResponse, ValidateInvitationRequest, ValidateInvitationResponse,
};

use super::authenticate;
use crate::{
    db::Role,
    error::AppError,
    invitation::{create_invitation, NewInvitation, ResolvedInvitation},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    #[serde(default)]
    pub token: String,
}

pub async fn validate_query(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidateInvitationResponse>, AppError> {
    let resolved = state.validator.validate(&query.token).await?;
    Ok(Json(to_response(resolved)))
}

pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateInvitationRequest>,
) -> Result<Json<ValidateInvitationResponse>, AppError> {
    let resolved = state.validator.validate(&req.token).await?;
    Ok(Json(to_response(resolved)))
}

fn to_response(resolved: ResolvedInvitation) -> ValidateInvitationResponse {
    ValidateInvitationResponse {
        valid: true,
        invitation: resolved.invitation.to_info(),
        customer: resolved.customer.to_info(),
        identity_source: resolved.source,
    }
}

pub async fn consume(
    State(state): State<AppState>,
    Json(req): Json<ConsumeInvitationRequest>,
) -> Result<Json<ConsumeInvitationResponse>, AppError> {
    let receipt = state.consumer.consume(&req.token).await?;
    Ok(Json(ConsumeInvitationResponse {
        consumed: receipt.consumed,
        already_consumed: receipt.already_consumed,
    }))
}

/// Staff-only: issue an invitation for a customer.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreateInvitationResponse>), AppError> {
    let claims = authenticate(&state, &headers).await?;
    if claims.role != Role::Staff {
        return Err(AppError::Forbidden("Only staff can issue invitations".to_string()));
    }

    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }

    let invitation = create_invitation(
        &state.db,
        NewInvitation {
            email: email.to_string(),
            customer_id: req.customer_id,
            expires_in_hours: req
                .expires_in_hours
                .unwrap_or(state.config.invitations.default_expiry_hours),
        },
    )
    .await?;

    let customer_id = invitation
        .customer_id
        .ok_or_else(|| AppError::Internal("Invitation created without a customer".to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            customer_id,
            invitation: invitation.to_info(),
        }),
    ))
}
