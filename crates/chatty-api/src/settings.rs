use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use chatty_auth::Claims;
use chatty_db::Database;
use chatty_gateway::GatewayState;
use chatty_types::api::{ApiResponse, AutoDeleteSetting};
use chatty_types::error::ChatError;

use crate::error::{ApiError, run_blocking};

pub const AUTO_DELETE_KEY: &str = "chat_auto_delete_minutes";

/// Accepted auto-delete intervals in minutes; 0 disables the sweep.
pub const ALLOWED_INTERVALS: [u32; 8] = [0, 1, 10, 60, 180, 360, 720, 1440];

/// Read the configured interval, treating a missing or corrupt value as
/// disabled.
pub fn auto_delete_minutes(db: &Database) -> Result<u32, ChatError> {
    let minutes = db
        .get_setting(AUTO_DELETE_KEY)?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    Ok(minutes)
}

pub async fn get_auto_delete(
    State(state): State<GatewayState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let minutes = run_blocking(move || auto_delete_minutes(&db)).await?;
    Ok(Json(ApiResponse::ok(AutoDeleteSetting { minutes })))
}

pub async fn set_auto_delete(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(setting): Json<AutoDeleteSetting>,
) -> Result<impl IntoResponse, ApiError> {
    if !ALLOWED_INTERVALS.contains(&setting.minutes) {
        return Err(ChatError::Validation(format!(
            "Interval must be one of {:?} minutes",
            ALLOWED_INTERVALS
        ))
        .into());
    }

    let db = state.db.clone();
    let minutes = setting.minutes;
    run_blocking(move || {
        db.set_setting(AUTO_DELETE_KEY, &minutes.to_string())
            .map_err(ChatError::from)
    })
    .await?;

    info!("{} set chat auto-delete to {} minutes", claims.username, minutes);
    Ok(Json(ApiResponse::ok(AutoDeleteSetting { minutes })))
}
