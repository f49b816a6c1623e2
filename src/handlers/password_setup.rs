//! Public endpoint that redeems a password setup token.

use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::extract::Json;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Deserialize, Serialize, ToSchema)]
pub struct PasswordSetupRequest {
    /// Raw token handed to the user at provisioning time
    pub token: String,
    /// New password, 8 to 128 characters
    pub password: String,
}

impl std::fmt::Debug for PasswordSetupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordSetupRequest")
            .field("token", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PasswordSetupResponse {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub email: String,
}

/// Complete password setup with a one-time token
#[utoipa::path(
    post,
    path = "/api/v1/password-setup",
    request_body = PasswordSetupRequest,
    responses(
        (status = 200, description = "Password stored", body = PasswordSetupResponse),
        (status = 400, description = "Token invalid, used or expired, or password rejected", body = ApiError)
    ),
    tag = "users"
)]
pub async fn complete_password_setup(
    State(state): State<AppState>,
    Json(request): Json<PasswordSetupRequest>,
) -> Result<Json<PasswordSetupResponse>, ApiError> {
    let user = state
        .accounts
        .complete_password_setup(&request.token, &request.password)
        .await?;

    Ok(Json(PasswordSetupResponse {
        user_id: user.id,
        email: user.email,
    }))
}
