use tracing::{debug, warn};

use chatty_types::models::Role;

use crate::liveness::LivenessStore;
use crate::tokens::{AuthError, Claims, TokenKeys, decode_unverified};

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Validates and refreshes access tokens for both transports, and owns
/// the forced-logout state. Shared between the REST layer and the
/// WebSocket gateway.
pub struct TokenAuthority {
    keys: TokenKeys,
    liveness: LivenessStore,
}

impl TokenAuthority {
    pub fn new(keys: TokenKeys, liveness: LivenessStore) -> Self {
        Self { keys, liveness }
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    /// Mint a token pair at login and record the refresh token as the
    /// user's liveness entry.
    pub fn login(&self, id: &str, username: &str, role: Role) -> Result<TokenPair, AuthError> {
        let access_token = self.keys.mint_access(id, username, role)?;
        let refresh_token = self.keys.mint_refresh(id, username, role)?;
        self.liveness.set(id, &refresh_token);
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Verify an access token. A cryptographically valid token is still
    /// rejected when the user's liveness entry is gone — that is the
    /// forced-logout mechanism, checked on every authenticated operation.
    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = self.keys.verify_access(token)?;
        if self.liveness.get(&claims.id).is_none() {
            warn!("User {} has no liveness entry, rejecting", claims.id);
            return Err(AuthError::ForcedLogout);
        }
        Ok(claims)
    }

    /// Authenticate, falling back to a silent refresh when the access
    /// token has expired. Returns the claims plus the new access token
    /// when one was minted.
    pub fn authenticate_or_refresh(
        &self,
        token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(Claims, Option<String>), AuthError> {
        match self.authenticate(token) {
            Ok(claims) => Ok((claims, None)),
            Err(AuthError::ExpiredToken) => {
                let refresh = refresh_token.ok_or(AuthError::ExpiredToken)?;
                let (claims, new_access) = self.refresh_expired_access(token, refresh)?;
                Ok((claims, Some(new_access)))
            }
            Err(err) => Err(err),
        }
    }

    /// Silent refresh for an expired access token: recover the user id
    /// without verifying the signature, require the liveness entry to
    /// match the presented refresh token (a mismatch is replay), then
    /// mint a new access token and extend the liveness TTL.
    fn refresh_expired_access(
        &self,
        expired_access: &str,
        refresh_token: &str,
    ) -> Result<(Claims, String), AuthError> {
        let stale = decode_unverified(expired_access)?;

        let stored = self.liveness.get(&stale.id).ok_or(AuthError::ForcedLogout)?;
        if stored != refresh_token {
            warn!("Refresh token mismatch for user {}", stale.id);
            return Err(AuthError::Replayed);
        }

        let access = self.keys.mint_access(&stale.id, &stale.username, stale.role)?;
        self.liveness.touch(&stale.id);
        debug!("Silently refreshed access token for user {}", stale.id);

        let claims = Claims {
            exp: (chrono::Utc::now() + self.keys.access_ttl).timestamp(),
            ..stale
        };
        Ok((claims, access))
    }

    /// Refresh driven by the refresh token alone (the REST refresh
    /// endpoint, where no access token accompanies the request).
    pub fn refresh_with_token(&self, refresh_token: &str) -> Result<(Claims, String), AuthError> {
        let claims = self.keys.verify_refresh(refresh_token)?;

        let stored = self.liveness.get(&claims.id).ok_or(AuthError::ForcedLogout)?;
        if stored != refresh_token {
            return Err(AuthError::Replayed);
        }

        let access = self.keys.mint_access(&claims.id, &claims.username, claims.role)?;
        self.liveness.touch(&claims.id);
        Ok((claims, access))
    }

    pub fn revoke(&self, user_id: &str) -> bool {
        self.liveness.remove(user_id)
    }

    pub fn revoke_all(&self) -> usize {
        self.liveness.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(
            TokenKeys::new("access-secret".into(), "refresh-secret".into()),
            LivenessStore::default(),
        )
    }

    /// Authority whose access tokens are already expired when minted.
    fn authority_with_expired_access() -> TokenAuthority {
        let mut keys = TokenKeys::new("access-secret".into(), "refresh-secret".into());
        keys.access_ttl = chrono::Duration::seconds(-120);
        TokenAuthority::new(keys, LivenessStore::default())
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let auth = authority();
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        let claims = auth.authenticate(&pair.access_token).unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn missing_token_is_rejected() {
        let auth = authority();
        assert_eq!(auth.authenticate("").unwrap_err(), AuthError::MissingToken);
    }

    #[test]
    fn revoked_user_fails_despite_valid_token() {
        let auth = authority();
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        assert!(auth.revoke("u1"));
        assert_eq!(
            auth.authenticate(&pair.access_token).unwrap_err(),
            AuthError::ForcedLogout
        );
    }

    #[test]
    fn expired_access_with_live_entry_refreshes_silently() {
        let auth = authority_with_expired_access();
        let pair = auth.login("u1", "alice", Role::Admin).unwrap();

        let (claims, new_token) = auth
            .authenticate_or_refresh(&pair.access_token, Some(&pair.refresh_token))
            .unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.role, Role::Admin);
        assert!(new_token.is_some());
    }

    #[test]
    fn expired_access_without_refresh_token_is_rejected() {
        let auth = authority_with_expired_access();
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        assert_eq!(
            auth.authenticate_or_refresh(&pair.access_token, None)
                .unwrap_err(),
            AuthError::ExpiredToken
        );
    }

    #[test]
    fn mismatched_refresh_token_is_replay() {
        let auth = authority_with_expired_access();
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        // A second login rotates the stored refresh token; presenting the
        // old one is a replay. The role change guarantees the rotated
        // token differs even within the same clock second.
        let _ = auth.login("u1", "alice", Role::Admin).unwrap();
        assert_eq!(
            auth.authenticate_or_refresh(&pair.access_token, Some(&pair.refresh_token))
                .unwrap_err(),
            AuthError::Replayed
        );
    }

    #[test]
    fn refresh_after_revoke_grants_nothing() {
        let auth = authority_with_expired_access();
        let pair = auth.login("u1", "alice", Role::User).unwrap();
        auth.revoke("u1");

        assert_eq!(
            auth.authenticate_or_refresh(&pair.access_token, Some(&pair.refresh_token))
                .unwrap_err(),
            AuthError::ForcedLogout
        );
    }

    #[test]
    fn ttl_expiry_is_forced_logout() {
        let keys = TokenKeys::new("a".into(), "r".into());
        let auth = TokenAuthority::new(keys, LivenessStore::new(Duration::from_millis(0)));
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        assert_eq!(
            auth.authenticate(&pair.access_token).unwrap_err(),
            AuthError::ForcedLogout
        );
    }

    #[test]
    fn revoke_all_counts_sessions() {
        let auth = authority();
        auth.login("u1", "alice", Role::User).unwrap();
        auth.login("u2", "bob", Role::User).unwrap();
        assert_eq!(auth.revoke_all(), 2);
    }

    #[test]
    fn rest_refresh_with_valid_cookie() {
        let auth = authority();
        let pair = auth.login("u1", "alice", Role::User).unwrap();

        let (claims, access) = auth.refresh_with_token(&pair.refresh_token).unwrap();
        assert_eq!(claims.id, "u1");
        assert!(auth.authenticate(&access).is_ok());
    }
}
