// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request guard errors.

use super::signer::TokenError;

/// Why the request guard refused a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// No CSRF cookie on the request.
    #[error("missing CSRF cookie")]
    MissingCsrfCookie,

    /// No CSRF header on the request.
    #[error("missing CSRF header")]
    MissingCsrfHeader,

    /// Header and cookie differ.
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// CSRF token forged or expired.
    #[error("invalid CSRF token: {0}")]
    InvalidCsrfToken(TokenError),

    /// Too many attempts from one client.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Webhook did not carry the shared token.
    #[error("callback token missing or invalid")]
    CallbackToken,

    /// Webhook source is not on the allowlist.
    #[error("callback source {0} is not allowed")]
    CallbackSource(String),

    /// Access cookie missing, forged, expired or bound to another session.
    #[error("document access denied: {0}")]
    AccessDenied(String),
}

impl GuardError {
    /// Stable machine-readable code returned to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            GuardError::MissingCsrfCookie
            | GuardError::MissingCsrfHeader
            | GuardError::CsrfMismatch
            | GuardError::InvalidCsrfToken(_) => "csrf_invalid",
            GuardError::RateLimited { .. } => "rate_limited",
            GuardError::CallbackToken | GuardError::CallbackSource(_) => "callback_forbidden",
            GuardError::AccessDenied(_) => "access_denied",
        }
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            GuardError::MissingCsrfCookie
            | GuardError::MissingCsrfHeader
            | GuardError::CsrfMismatch
            | GuardError::InvalidCsrfToken(_) => {
                "Your session has expired. Reload the page and try again."
            }
            GuardError::RateLimited { .. } => {
                "Too many payment attempts. Please wait before trying again."
            }
            GuardError::CallbackToken | GuardError::CallbackSource(_) => "Forbidden",
            GuardError::AccessDenied(_) => "Payment is required to access this document.",
        }
    }
}
