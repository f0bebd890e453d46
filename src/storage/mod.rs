// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state of the payment flow. Everything lives under `DATA_DIR`:
//!
//! ```text
//! $DATA_DIR/
//!   ledger.redb              # Payment attempts (ACID, redb)
//!   audit/
//!     {date}/events.jsonl    # Daily audit logs
//! ```
//!
//! The ledger and the audit log are reached through traits
//! ([`PaymentLedger`], [`AuditSink`], [`SessionDirectory`]) so handlers and
//! the orchestrator can be tested without touching disk.

pub mod audit;
pub mod ledger;
pub mod paths;
pub mod sessions;

pub use audit::{AuditError, AuditEvent, AuditEventType, AuditSink, JsonlAuditLog};
pub use ledger::{Completion, LedgerError, LedgerResult, PaymentLedger, RedbLedger};
pub use paths::StoragePaths;
pub use sessions::{InMemorySessionDirectory, SessionDirectory};
