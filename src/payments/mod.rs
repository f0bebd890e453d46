// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Orchestration
//!
//! Drives a document unlock payment from initiation, through the gateway's
//! asynchronous webhook, to a terminal status observed by polling.
//!
//! ```text
//! client ── initiate ──▶ orchestrator ── STK push ──▶ gateway
//!                              │                         │
//!                         ledger (pending)          payer's phone
//!                              ▲                         │
//! client ◀── status ───────────┤◀──── webhook ───────────┘
//! ```

pub mod callback;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod phone;

pub use callback::{CallbackAck, StkCallback, StkCallbackEnvelope};
pub use error::PaymentError;
pub use model::{PaymentAttempt, PaymentOutcome, PaymentStatus};
pub use orchestrator::{
    parse_session_id, CallbackDisposition, Initiation, OrchestratorConfig, PaymentOrchestrator,
};
pub use phone::{normalize_phone, MsisdnNumber, PhoneError};
