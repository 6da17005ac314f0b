use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use chatty_auth::Claims;
use chatty_gateway::GatewayState;
use chatty_types::api::{ApiResponse, RegisterDeviceTokenRequest};
use chatty_types::error::ChatError;

use crate::error::{ApiError, run_blocking};

/// Register a device token for the caller. Re-registering the same token
/// string is a no-op, so clients can post it on every launch.
pub async fn register_device_token(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.token.trim().is_empty() {
        return Err(ChatError::Validation("Device token is required".into()).into());
    }

    let db = state.db.clone();
    let user_id = claims.id.clone();
    let token = req.token.trim().to_string();
    run_blocking(move || {
        db.register_device_token(&Uuid::new_v4().to_string(), &user_id, &token)
            .map_err(ChatError::from)
    })
    .await?;

    info!("Registered device token for {} ({})", claims.username, claims.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok_empty())))
}
