// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Optional hardening of the gateway webhook.
//!
//! The gateway does not sign its callbacks. Two checks can be switched on
//! independently:
//!
//! - a shared token that the gateway echoes back as `?token=` because it is
//!   baked into the registered callback URL;
//! - a source allowlist matched against the transport peer address.
//!   `X-Forwarded-For` is never used here; the caller controls it.
//!
//! With neither configured every well-formed callback is accepted.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::GuardError;

#[derive(Debug, Clone, Default)]
pub struct CallbackGuard {
    token: Option<String>,
    allowed_sources: Vec<String>,
}

impl CallbackGuard {
    pub fn new(token: Option<String>, allowed_sources: Vec<String>) -> Self {
        Self {
            token,
            allowed_sources,
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.token.is_some() || !self.allowed_sources.is_empty()
    }

    /// `peer` is the transport peer address, `None` when unknown.
    pub fn check(
        &self,
        presented_token: Option<&str>,
        peer: Option<IpAddr>,
    ) -> Result<(), GuardError> {
        if let Some(expected) = &self.token {
            match presented_token {
                Some(presented) if tokens_match(expected, presented) => {}
                _ => return Err(GuardError::CallbackToken),
            }
        }

        if !self.allowed_sources.is_empty() {
            let peer = peer.map(|ip| ip.to_canonical().to_string());
            let allowed = peer
                .as_deref()
                .is_some_and(|ip| self.allowed_sources.iter().any(|a| a == ip));
            if !allowed {
                return Err(GuardError::CallbackSource(
                    peer.unwrap_or_else(|| "unknown".to_string()),
                ));
            }
        }

        Ok(())
    }
}

/// Constant-time comparison via HMAC of the presented value.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(expected.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(presented.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}
