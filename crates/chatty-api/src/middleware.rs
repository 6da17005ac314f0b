use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use chatty_auth::AuthError;
use chatty_gateway::GatewayState;
use chatty_types::error::ChatError;

use crate::error::ApiError;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "chatty_refresh_token";

/// Response header carrying a silently-refreshed access token. Clients
/// must watch for it on every authenticated response.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub fn auth_message(err: &AuthError) -> String {
    match err {
        AuthError::ForcedLogout => "Session revoked, please sign in again".into(),
        AuthError::ExpiredToken => "Authentication token expired".into(),
        AuthError::Replayed => "Refresh token mismatch".into(),
        AuthError::MissingToken | AuthError::InvalidToken => "Authentication failed".into(),
    }
}

/// Bearer authentication with silent refresh. An expired access token is
/// refreshed from the `chatty_refresh_token` cookie and the new token is
/// handed back in the `x-access-token` response header; the request
/// proceeds as if the token had been valid. Liveness is checked on every
/// request, so a forced logout beats a cryptographically valid JWT.
pub async fn require_auth(
    State(state): State<GatewayState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| ChatError::Unauthorized("Missing bearer token".into()))?;

    let refresh = cookie_value(req.headers(), REFRESH_COOKIE);

    let (claims, new_access) = state
        .authority
        .authenticate_or_refresh(&token, refresh.as_deref())
        .map_err(|err| ChatError::Unauthorized(auth_message(&err)))?;

    req.extensions_mut().insert(claims);
    let mut response = next.run(req).await;

    if let Some(access) = new_access {
        debug!("Attached silently refreshed access token to response");
        if let Ok(value) = HeaderValue::from_str(&access) {
            response.headers_mut().insert(ACCESS_TOKEN_HEADER, value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_picks_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; chatty_refresh_token=tok.en.value; b=2"),
        );
        assert_eq!(
            cookie_value(&headers, REFRESH_COOKIE).as_deref(),
            Some("tok.en.value")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
