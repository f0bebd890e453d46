// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HMAC-SHA256 signed, expiring tokens.
//!
//! Format: `base64url(payload).expiry.base64url(signature)` where `expiry` is
//! a unix timestamp in seconds and the signature covers the first two parts.
//! Verification is stateless; no storage round-trip is needed.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of a generated signing key.
const RANDOM_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("signing key unavailable: {0}")]
    Key(String),
}

#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| TokenError::Key(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Signer with a fresh random key. Tokens do not survive a restart.
    pub fn random() -> Result<Self, TokenError> {
        let secret = random_bytes::<RANDOM_KEY_BYTES>()?;
        Self::new(&secret)
    }

    pub fn sign(&self, payload: &str, expires_at: DateTime<Utc>) -> String {
        let signed_part = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(payload.as_bytes()),
            expires_at.timestamp()
        );
        let mut mac = self.mac.clone();
        mac.update(signed_part.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!("{signed_part}.{}", Base64UrlUnpadded::encode_string(&signature))
    }

    /// Check signature and expiry, returning the payload.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut parts = token.split('.');
        let (Some(payload_b64), Some(expiry), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        mac.update(b".");
        mac.update(expiry.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let expiry: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        if expiry <= now.timestamp() {
            return Err(TokenError::Expired);
        }

        let payload =
            Base64UrlUnpadded::decode_vec(payload_b64).map_err(|_| TokenError::Malformed)?;
        String::from_utf8(payload).map_err(|_| TokenError::Malformed)
    }
}

/// Fill a buffer from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], TokenError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| TokenError::Key("system random source failed".to_string()))?;
    Ok(bytes)
}
