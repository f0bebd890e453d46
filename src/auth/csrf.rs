// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Double-submit CSRF protection for the initiation endpoint.
//!
//! 1. `GET /v1/payments/csrf` mints a signed random token, sets it as the
//!    `csrf_token` cookie (readable by script, same-site strict) and returns
//!    it in the body.
//! 2. The client echoes it in `X-CSRF-Token`.
//! 3. Initiation requires header == cookie, a valid signature and an
//!    unexpired token. Anything else fails closed.

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};

use super::error::GuardError;
use super::signer::{random_bytes, TokenError, TokenSigner};

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_TOKEN_TTL_SECS: i64 = 3600;
const CSRF_NONCE_BYTES: usize = 32;

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct CsrfToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CsrfGuard {
    signer: Arc<TokenSigner>,
    cookie_secure: bool,
}

impl CsrfGuard {
    pub fn new(signer: Arc<TokenSigner>, cookie_secure: bool) -> Self {
        Self {
            signer,
            cookie_secure,
        }
    }

    pub fn issue(&self, now: DateTime<Utc>) -> Result<CsrfToken, TokenError> {
        let nonce = random_bytes::<CSRF_NONCE_BYTES>()?;
        let expires_at = now + Duration::seconds(CSRF_TOKEN_TTL_SECS);
        Ok(CsrfToken {
            value: self
                .signer
                .sign(&Base64UrlUnpadded::encode_string(&nonce), expires_at),
            expires_at,
        })
    }

    /// `Set-Cookie` value for a minted token.
    pub fn set_cookie(&self, token: &CsrfToken) -> String {
        let mut cookie = format!(
            "{CSRF_COOKIE}={}; Path=/; Max-Age={CSRF_TOKEN_TTL_SECS}; SameSite=Strict",
            token.value
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn verify(
        &self,
        cookie: Option<&str>,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        let cookie = cookie
            .filter(|v| !v.is_empty())
            .ok_or(GuardError::MissingCsrfCookie)?;
        let header = header
            .filter(|v| !v.is_empty())
            .ok_or(GuardError::MissingCsrfHeader)?;

        if cookie != header {
            return Err(GuardError::CsrfMismatch);
        }

        self.signer
            .verify(cookie, now)
            .map(|_| ())
            .map_err(GuardError::InvalidCsrfToken)
    }
}
