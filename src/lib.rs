// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document Paywall - M-Pesa STK Push Payment Service
//!
//! Unlocks a paid document once the payer approves a mobile-money charge on
//! their phone. The server initiates the charge, records the attempt, applies
//! the gateway's asynchronous webhook, and answers status polls; a successful
//! payment yields a signed, short-lived access cookie.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Request guard: CSRF, rate limiting, webhook checks, access cookie
//! - `client` - Confirmation poller for the payer side
//! - `payments` - Phone normalization, attempt model, orchestration
//! - `providers` - Payment gateway client (Safaricom Daraja)
//! - `storage` - Payment ledger (redb) and audit log

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod payments;
pub mod providers;
pub mod state;
pub mod storage;
