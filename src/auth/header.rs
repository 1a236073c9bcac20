//! `Authorization` header parsing.

use axum::http::{HeaderMap, header};

use super::errors::AuthError;

/// Pull the token out of an `Authorization: Bearer <token>` header.
///
/// A missing or blank header is [`AuthError::MissingHeader`]. Anything other
/// than exactly two space-separated parts with a case-insensitive `bearer`
/// scheme is [`AuthError::MalformedHeader`].
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = match headers.get(header::AUTHORIZATION) {
        Some(value) => value.to_str().map_err(|_| AuthError::MalformedHeader)?,
        None => return Err(AuthError::MissingHeader),
    };

    if value.trim().is_empty() {
        return Err(AuthError::MissingHeader);
    }

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Ok(token)
        }
        _ => Err(AuthError::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_bearer() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers_with("bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers_with("BEARER abc")).unwrap(), "abc");
    }

    #[test]
    fn test_missing_or_blank() {
        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(AuthError::MissingHeader)
        ));
        assert!(matches!(
            bearer_token(&headers_with("")),
            Err(AuthError::MissingHeader)
        ));
        assert!(matches!(
            bearer_token(&headers_with("   ")),
            Err(AuthError::MissingHeader)
        ));
    }

    #[test]
    fn test_malformed() {
        for value in ["Bearer", "Basic abc", "Bearer a b", "Bearer  abc", "Token abc"] {
            assert!(
                matches!(
                    bearer_token(&headers_with(value)),
                    Err(AuthError::MalformedHeader)
                ),
                "{:?} should be malformed",
                value
            );
        }
    }
}
