//! Axum extractors for authentication and client context.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use chrono::Duration;

use super::errors::AuthError;
use super::header::bearer_token;
use super::ip::client_ip;
use super::state::HasAuthBackend;
use crate::session::ClientContext;
use crate::token::{Identity, TokenCodec};

/// Verify the bearer token in `headers` and return who it speaks for.
///
/// Refresh tokens open with the same key, so a token whose lifetime is longer
/// than `access_ttl` is refused.
pub fn authenticate(
    headers: &HeaderMap,
    tokens: &TokenCodec,
    access_ttl: Duration,
) -> Result<Identity, AuthError> {
    let token = bearer_token(headers)?;
    let payload = tokens.verify_token(token)?;
    if payload.expires_at - payload.issued_at > access_ttl {
        return Err(AuthError::NotAccessToken);
    }
    Ok(payload.identity())
}

/// Extractor for endpoints that require a valid access token.
pub struct Auth(pub Identity);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state.tokens(), state.access_ttl())
            .map(Auth)
            .inspect_err(|e| {
                tracing::warn!(path = %parts.uri.path(), error = %e, "Request not authenticated");
            })
    }
}

/// User agent and address of the caller. Never rejects.
pub struct Client(pub ClientContext);

impl<S> FromRequestParts<S> for Client
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(Client(ClientContext {
            user_agent,
            client_ip: client_ip(parts, state.trust_proxy()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use uuid::Uuid;

    use super::*;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_long_lived_token_is_not_an_access_token() {
        let tokens = TokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let (user_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let access_ttl = Duration::minutes(15);

        let (access, _) = tokens.create_token(user_id, session_id, access_ttl).unwrap();
        let identity = authenticate(&bearer(&access), &tokens, access_ttl).unwrap();
        assert_eq!(identity.session_id, session_id);

        let (refresh, _) = tokens
            .create_token(user_id, session_id, Duration::hours(24))
            .unwrap();
        assert!(matches!(
            authenticate(&bearer(&refresh), &tokens, access_ttl),
            Err(AuthError::NotAccessToken)
        ));
    }
}
