// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Guard
//!
//! Everything that decides whether a request may touch the payment flow.
//!
//! ## Initiation
//!
//! 1. Client identity is taken from `X-Forwarded-For` (first hop) or the
//!    transport peer address.
//! 2. The identity's fixed-window counter is incremented; over the limit the
//!    request is answered 429.
//! 3. The `X-CSRF-Token` header must equal the `csrf_token` cookie and carry
//!    a valid, unexpired signature; otherwise 403.
//!
//! ## Webhook
//!
//! Optional shared token and an allowlist of transport peer addresses
//! ([`CallbackGuard`]).
//!
//! ## Unlock
//!
//! A signed `doc_access` cookie ([`AccessGrants`]) is issued once a payment
//! succeeds and verified without a ledger lookup.

pub mod access;
pub mod csrf;
pub mod error;
pub mod extractor;
pub mod rate_limit;
pub mod signer;
pub mod webhook;

pub use access::{AccessGrants, ACCESS_COOKIE};
pub use csrf::{CsrfGuard, CsrfToken, CSRF_COOKIE, CSRF_HEADER};
pub use error::GuardError;
pub use extractor::{ClientIdentity, Cookies, PeerAddr};
pub use rate_limit::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
pub use signer::{TokenError, TokenSigner};
pub use webhook::CallbackGuard;
