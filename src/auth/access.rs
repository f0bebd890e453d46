// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed `doc_access` cookie granting access to an unlocked document.
//!
//! The cookie binds a session id to an expiry with an HMAC, so document
//! requests can be authorized without a ledger lookup.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::error::GuardError;
use super::signer::TokenSigner;

pub const ACCESS_COOKIE: &str = "doc_access";
pub const ACCESS_TTL_SECS: i64 = 900;

#[derive(Debug, Clone)]
pub struct AccessGrants {
    signer: Arc<TokenSigner>,
    cookie_secure: bool,
}

impl AccessGrants {
    pub fn new(signer: Arc<TokenSigner>, cookie_secure: bool) -> Self {
        Self {
            signer,
            cookie_secure,
        }
    }

    /// Token for the session, valid for [`ACCESS_TTL_SECS`].
    pub fn issue(&self, session_id: &str, now: DateTime<Utc>) -> String {
        self.signer
            .sign(session_id, now + Duration::seconds(ACCESS_TTL_SECS))
    }

    pub fn set_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{ACCESS_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={ACCESS_TTL_SECS}"
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Check that `token` is a live grant for `session_id`.
    pub fn verify(
        &self,
        token: Option<&str>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GuardError::AccessDenied("no access cookie".to_string()))?;

        let granted_session = self
            .signer
            .verify(token, now)
            .map_err(|e| GuardError::AccessDenied(e.to_string()))?;

        if granted_session != session_id {
            return Err(GuardError::AccessDenied(
                "access cookie belongs to another session".to_string(),
            ));
        }
        Ok(())
    }
}
