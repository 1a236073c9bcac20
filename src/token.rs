//! Encrypted bearer tokens.
//!
//! A token is `v2.local.` followed by the unpadded base64url encoding of a
//! 24-byte XChaCha20-Poly1305 nonce and the sealed JSON payload. The header is
//! bound as associated data, so a token cannot be replayed under another
//! version prefix. Verification needs only the key, never the database.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const HEADER: &str = "v2.local.";

/// Required symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 24;

/// Poly1305 tag appended by the cipher.
const TAG_LEN: usize = 16;

/// Access token lifetime: 15 minutes
pub const ACCESS_TOKEN_VALIDITY_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 24 hours
pub const REFRESH_TOKEN_VALIDITY_SECS: i64 = 24 * 60 * 60;

/// Who a request acts for. Produced only by a successful token verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// What a token carries once opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub session_id: Uuid,
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "expired_at")]
    pub expires_at: DateTime<Utc>,
}

impl TokenPayload {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            session_id: self.session_id,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token carries an invalid identity")]
    InvalidIdentity,
    #[error("token validity must be positive and representable")]
    InvalidValidity,
    #[error("failed to seal token")]
    Seal,
}

#[derive(Debug, Error)]
#[error("token key must be exactly {KEY_LEN} bytes, got {actual}")]
pub struct KeyError {
    pub actual: usize,
}

/// Mints and opens bearer tokens with a single symmetric key.
pub struct TokenCodec {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec, rejecting any key that is not exactly [`KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self, KeyError> {
        if key.len() != KEY_LEN {
            return Err(KeyError { actual: key.len() });
        }
        let cipher =
            XChaCha20Poly1305::new_from_slice(key).map_err(|_| KeyError { actual: key.len() })?;
        Ok(Self { cipher })
    }

    /// Issue a token valid for `validity` from now.
    pub fn create_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        validity: Duration,
    ) -> Result<(String, TokenPayload), TokenError> {
        if validity <= Duration::zero() {
            return Err(TokenError::InvalidValidity);
        }

        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(validity)
            .ok_or(TokenError::InvalidValidity)?;
        let payload = TokenPayload {
            session_id,
            user_id,
            issued_at,
            expires_at,
        };

        let plaintext = serde_json::to_vec(&payload).map_err(|_| TokenError::Seal)?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Seal)?;

        let mut body = Vec::with_capacity(NONCE_LEN + sealed.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&sealed);

        let token = format!("{}{}", HEADER, URL_SAFE_NO_PAD.encode(body));
        Ok((token, payload))
    }

    /// Open a token and check it is still valid now.
    pub fn verify_token(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.verify_token_at(token, Utc::now())
    }

    fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenPayload, TokenError> {
        let encoded = token.strip_prefix(HEADER).ok_or(TokenError::Malformed)?;
        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| TokenError::Malformed)?;
        if body.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Malformed);
        }

        let (nonce, sealed) = body.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Malformed)?;

        let payload: TokenPayload =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Malformed)?;

        if now > payload.expires_at {
            return Err(TokenError::Expired);
        }
        if payload.session_id.is_nil() || payload.user_id.is_nil() {
            return Err(TokenError::InvalidIdentity);
        }

        Ok(payload)
    }
}
