use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{AppendHeaders, IntoResponse},
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use chatty_auth::Claims;
use chatty_gateway::GatewayState;
use chatty_gateway::enrich::user_public;
use chatty_types::api::{ApiResponse, LoginRequest, RegisterRequest};
use chatty_types::error::ChatError;
use chatty_types::models::{Role, UserPublic};

use crate::error::{ApiError, run_blocking};
use crate::middleware::{ACCESS_COOKIE, ACCESS_TOKEN_HEADER, REFRESH_COOKIE, auth_message, cookie_value};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInData {
    pub user: UserPublic,
    pub access_token: String,
}

fn cookie(name: &str, value: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age_secs
    )
}

fn expired_cookie(name: &str) -> String {
    cookie(name, "", 0)
}

pub async fn sign_in(
    State(state): State<GatewayState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.clone();
    let user = run_blocking(move || db.get_user_by_username(&username).map_err(ChatError::from))
        .await?
        .ok_or_else(|| ChatError::Unauthorized("Invalid username or password".into()))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ChatError::Internal(e.to_string()))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ChatError::Unauthorized("Invalid username or password".into()))?;

    let pair = state
        .authority
        .login(&user.id, &user.username, Role::parse(&user.role))
        .map_err(|e| ChatError::Internal(e.to_string()))?;

    info!("{} ({}) signed in", user.username, user.id);

    let keys = state.authority.keys();
    let headers = AppendHeaders([
        (
            header::SET_COOKIE,
            cookie(ACCESS_COOKIE, &pair.access_token, keys.access_ttl.num_seconds()),
        ),
        (
            header::SET_COOKIE,
            cookie(REFRESH_COOKIE, &pair.refresh_token, keys.refresh_ttl.num_seconds()),
        ),
    ]);

    Ok((
        headers,
        Json(ApiResponse::ok(SignInData {
            user: user_public(&user),
            access_token: pair.access_token.clone(),
        })),
    ))
}

pub async fn register(
    State(state): State<GatewayState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ChatError::Validation("Username must be 3-32 characters".into()).into());
    }
    if req.password.len() < 8 {
        return Err(ChatError::Validation("Password must be at least 8 characters".into()).into());
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ChatError::Internal(e.to_string()))?
        .to_string();

    let db = state.db.clone();
    let user_id = Uuid::new_v4().to_string();
    let user = run_blocking(move || {
        if db.get_user_by_username(&req.username)?.is_some() {
            return Err(ChatError::Validation("Username already taken".into()));
        }
        db.create_user(&user_id, &req.username, &password_hash, "USER")?;
        db.get_user_by_id(&user_id)?
            .ok_or_else(|| ChatError::Internal(format!("user {} vanished after insert", user_id)))
    })
    .await?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user_public(&user)))))
}

pub async fn logout(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    state.authority.revoke(&claims.id);
    info!("{} ({}) logged out", claims.username, claims.id);

    let headers = AppendHeaders([
        (header::SET_COOKIE, expired_cookie(ACCESS_COOKIE)),
        (header::SET_COOKIE, expired_cookie(REFRESH_COOKIE)),
    ]);
    (headers, Json(ApiResponse::ok_empty()))
}

/// Refresh driven by the cookie alone, for clients whose access token is
/// long gone. The new access token travels in both the `x-access-token`
/// header and the refreshed cookie.
pub async fn refresh_token(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let refresh = cookie_value(&headers, REFRESH_COOKIE)
        .ok_or_else(|| ChatError::Unauthorized("Missing refresh token".into()))?;

    let (claims, access) = state
        .authority
        .refresh_with_token(&refresh)
        .map_err(|err| ChatError::Unauthorized(auth_message(&err)))?;

    info!("Refreshed access token for {} ({})", claims.username, claims.id);

    let keys = state.authority.keys();
    let response_headers = AppendHeaders([
        (ACCESS_TOKEN_HEADER, access.clone()),
        (
            "set-cookie",
            cookie(ACCESS_COOKIE, &access, keys.access_ttl.num_seconds()),
        ),
    ]);
    Ok((response_headers, Json(ApiResponse::ok_empty())))
}

pub async fn info(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.id.clone();
    let user = run_blocking(move || db.get_user_by_id(&id).map_err(ChatError::from))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("user {}", claims.id)))?;
    Ok(Json(ApiResponse::ok(user_public(&user))))
}

/// Revoke one user's liveness entry: every open session dies on its next
/// authenticated operation. Idempotent.
pub async fn force_logout(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    let revoked = state.authority.revoke(&user_id);
    info!(
        "{} force-logged-out user {} (entry existed: {})",
        claims.username, user_id, revoked
    );
    Ok(Json(ApiResponse::ok_empty()))
}

#[derive(Serialize)]
pub struct RevokedCount {
    pub revoked: usize,
}

pub async fn force_logout_all(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    let revoked = state.authority.revoke_all();
    info!("{} force-logged-out all users ({} entries)", claims.username, revoked);
    Ok(Json(ApiResponse::ok(RevokedCount { revoked })))
}

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.role != Role::Admin {
        return Err(ChatError::Unauthorized("Admin role required".into()).into());
    }
    Ok(())
}
