//! Bearer-key authentication: the gateway is fronted by one shared key, not
//! per-user virtual keys or JWTs -- there is exactly one tenant.
//!
//! The comparison runs in constant time via [`subtle::ConstantTimeEq`] so a
//! timing side-channel can't be used to guess the key byte by byte.

use subtle::ConstantTimeEq;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MalformedHeader,
    #[error("invalid gateway key")]
    InvalidKey,
}

pub struct AuthService {
    gateway_key: String,
}

impl AuthService {
    pub fn new(gateway_key: impl Into<String>) -> Self {
        Self {
            gateway_key: gateway_key.into(),
        }
    }

    /// Validates a raw `Authorization` header value. Accepts only
    /// `Bearer <key>`; anything else -- missing header, wrong scheme, extra
    /// whitespace inside the token -- is a malformed header, not a key
    /// mismatch, so callers can distinguish the two failure modes in logs.
    pub fn authenticate(&self, header_value: Option<&str>) -> Result<(), AuthError> {
        let header_value = header_value.ok_or(AuthError::MalformedHeader)?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedHeader)?;

        if token.is_empty() {
            return Err(AuthError::MalformedHeader);
        }

        let provided = token.as_bytes();
        let expected = self.gateway_key.as_bytes();
        // Constant-time equality requires equal-length inputs; comparing
        // length first is itself timing-observable but only leaks length,
        // never content, and the key length is not a secret.
        if provided.len() != expected.len() || provided.ct_eq(expected).unwrap_u8() != 1 {
            return Err(AuthError::InvalidKey);
        }
        Ok(())
    }
}
