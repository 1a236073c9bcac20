//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::token::TokenError;

/// Why a request was refused at the authentication boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header is not provided")]
    MissingHeader,
    #[error("invalid authorization header format")]
    MalformedHeader,
    #[error("invalid token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    InvalidIdentity,
    #[error("invalid token")]
    NotAccessToken,
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthError::Expired,
            TokenError::InvalidIdentity => AuthError::InvalidIdentity,
            TokenError::Malformed | TokenError::InvalidValidity | TokenError::Seal => {
                AuthError::Malformed
            }
        }
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingHeader | AuthError::MalformedHeader => StatusCode::BAD_REQUEST,
            AuthError::Malformed
            | AuthError::Expired
            | AuthError::InvalidIdentity
            | AuthError::NotAccessToken => {
                StatusCode::UNAUTHORIZED
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
