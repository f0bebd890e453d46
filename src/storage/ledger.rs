// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded payment ledger backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `attempts`: checkout_id → serialized PaymentAttempt
//! - `session_attempts`: (session_id|!created_ms|checkout_id) → checkout_id
//! - `reference_attempts`: (account_reference|!created_ms|checkout_id) → checkout_id
//!
//! Rows are never deleted. The only mutation after insert is [`PaymentLedger::complete`],
//! which runs inside a single write transaction and only touches `pending` rows.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::payments::model::{PaymentAttempt, PaymentOutcome, PaymentStatus};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: gateway checkout id → serialized PaymentAttempt (JSON bytes).
const ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attempts");

/// Index: `session_id|!created_ms_be|checkout_id` → checkout_id, newest first.
const SESSION_ATTEMPTS: TableDefinition<&[u8], &str> = TableDefinition::new("session_attempts");

/// Index: `account_reference|!created_ms_be|checkout_id` → checkout_id, newest first.
const REFERENCE_ATTEMPTS: TableDefinition<&[u8], &str> =
    TableDefinition::new("reference_attempts");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("attempt already recorded: {0}")]
    Duplicate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of a conditional terminal write.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The row was pending and now holds the outcome.
    Applied(PaymentAttempt),
    /// The row was already terminal; it is returned unchanged.
    AlreadyTerminal(PaymentAttempt),
    /// No row for this checkout id.
    NotFound,
}

/// Durable store of payment attempts.
pub trait PaymentLedger: Send + Sync {
    /// Record a freshly acknowledged attempt.
    fn insert(&self, attempt: &PaymentAttempt) -> LedgerResult<()>;

    fn get(&self, checkout_id: &str) -> LedgerResult<Option<PaymentAttempt>>;

    /// Newest `pending` attempt for the session created at or after `since`.
    fn find_recent_pending(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<Option<PaymentAttempt>>;

    /// Newest attempt for the session, any status.
    fn latest_for_session(&self, session_id: &str) -> LedgerResult<Option<PaymentAttempt>>;

    /// Newest attempt carrying the account reference, any status.
    fn latest_for_reference(&self, account_reference: &str)
        -> LedgerResult<Option<PaymentAttempt>>;

    /// Apply a terminal outcome if, and only if, the row is still `pending`.
    fn complete(&self, checkout_id: &str, outcome: PaymentOutcome) -> LedgerResult<Completion>;

    /// Cheap read used by the readiness check.
    fn health_check(&self) -> LedgerResult<()>;
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite index key.
///
/// Format: `owner | inverted_millis_be_bytes | checkout_id`
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_index_key(owner: &str, created_at: DateTime<Utc>, checkout_id: &str) -> Vec<u8> {
    let millis = created_at.timestamp_millis();
    let mut key = Vec::with_capacity(owner.len() + 1 + 8 + 1 + checkout_id.len());
    key.extend_from_slice(owner.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!millis as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(checkout_id.as_bytes());
    key
}

fn make_prefix(owner: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(owner.len() + 1);
    prefix.extend_from_slice(owner.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a prefix scan (prefix with 0xFF bytes appended).
fn make_prefix_end(owner: &str) -> Vec<u8> {
    let mut end = make_prefix(owner);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

// =============================================================================
// RedbLedger
// =============================================================================

pub struct RedbLedger {
    db: Database,
}

impl RedbLedger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ATTEMPTS)?;
            let _ = write_txn.open_table(SESSION_ATTEMPTS)?;
            let _ = write_txn.open_table(REFERENCE_ATTEMPTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Walk an index newest-first, returning the first attempt accepted by
    /// `keep`. `stop` ends the scan early.
    fn scan_index(
        &self,
        index: TableDefinition<&[u8], &str>,
        owner: &str,
        mut keep: impl FnMut(&PaymentAttempt) -> bool,
        mut stop: impl FnMut(&PaymentAttempt) -> bool,
    ) -> LedgerResult<Option<PaymentAttempt>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(index)?;
        let attempts = read_txn.open_table(ATTEMPTS)?;

        let start = make_prefix(owner);
        let end = make_prefix_end(owner);

        for entry in idx_table.range(start.as_slice()..end.as_slice())? {
            let (_, checkout_id) = entry?;
            let Some(value) = attempts.get(checkout_id.value())? else {
                continue;
            };
            let attempt: PaymentAttempt = serde_json::from_slice(value.value())?;
            if stop(&attempt) {
                break;
            }
            if keep(&attempt) {
                return Ok(Some(attempt));
            }
        }
        Ok(None)
    }
}

impl PaymentLedger for RedbLedger {
    fn insert(&self, attempt: &PaymentAttempt) -> LedgerResult<()> {
        let json = serde_json::to_vec(attempt)?;
        let checkout_id = attempt.checkout_id.as_str();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ATTEMPTS)?;
            if table.get(checkout_id)?.is_some() {
                return Err(LedgerError::Duplicate(checkout_id.to_string()));
            }
            table.insert(checkout_id, json.as_slice())?;

            let mut sessions = write_txn.open_table(SESSION_ATTEMPTS)?;
            let key = make_index_key(&attempt.session_id, attempt.created_at, checkout_id);
            sessions.insert(key.as_slice(), checkout_id)?;

            let mut references = write_txn.open_table(REFERENCE_ATTEMPTS)?;
            let key = make_index_key(&attempt.account_reference, attempt.created_at, checkout_id);
            references.insert(key.as_slice(), checkout_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, checkout_id: &str) -> LedgerResult<Option<PaymentAttempt>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTEMPTS)?;
        match table.get(checkout_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn find_recent_pending(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<Option<PaymentAttempt>> {
        self.scan_index(
            SESSION_ATTEMPTS,
            session_id,
            |attempt| attempt.status == PaymentStatus::Pending,
            |attempt| attempt.created_at < since,
        )
    }

    fn latest_for_session(&self, session_id: &str) -> LedgerResult<Option<PaymentAttempt>> {
        self.scan_index(SESSION_ATTEMPTS, session_id, |_| true, |_| false)
    }

    fn latest_for_reference(
        &self,
        account_reference: &str,
    ) -> LedgerResult<Option<PaymentAttempt>> {
        self.scan_index(REFERENCE_ATTEMPTS, account_reference, |_| true, |_| false)
    }

    fn complete(&self, checkout_id: &str, outcome: PaymentOutcome) -> LedgerResult<Completion> {
        let write_txn = self.db.begin_write()?;
        let completion = {
            let mut table = write_txn.open_table(ATTEMPTS)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = match table.get(checkout_id)? {
                Some(existing) => existing.value().to_vec(),
                None => return Ok(Completion::NotFound),
            };

            let mut attempt: PaymentAttempt = serde_json::from_slice(&existing_bytes)?;
            if attempt.status.is_terminal() {
                Completion::AlreadyTerminal(attempt)
            } else {
                outcome.apply_to(&mut attempt);
                let json = serde_json::to_vec(&attempt)?;
                table.insert(checkout_id, json.as_slice())?;
                Completion::Applied(attempt)
            }
        };

        match completion {
            Completion::Applied(_) => write_txn.commit()?,
            _ => write_txn.abort()?,
        }
        Ok(completion)
    }

    fn health_check(&self) -> LedgerResult<()> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ATTEMPTS)?;
        let _ = table.first()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SESSION: &str = "3f4d6542-b8ce-4226-93d3-80d6f14d6db2";
    const REFERENCE: &str = "DOC3F4D6542B";

    fn temp_ledger() -> (RedbLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RedbLedger::open(&dir.path().join("ledger.redb")).unwrap();
        (ledger, dir)
    }

    fn attempt(checkout_id: &str, age_secs: i64) -> PaymentAttempt {
        let mut attempt = PaymentAttempt::new_pending(
            checkout_id.to_string(),
            format!("mr_{checkout_id}"),
            SESSION.to_string(),
            REFERENCE.to_string(),
            50,
            "254727921038".to_string(),
        );
        attempt.created_at = attempt.created_at - Duration::seconds(age_secs);
        attempt.updated_at = attempt.created_at;
        attempt
    }

    fn paid(receipt: &str) -> PaymentOutcome {
        PaymentOutcome::Paid {
            receipt_code: receipt.to_string(),
            confirmed_phone: Some("254727921038".to_string()),
            result_code: 0,
            result_description: "ok".to_string(),
        }
    }

    fn declined() -> PaymentOutcome {
        PaymentOutcome::Declined {
            result_code: 1032,
            result_description: "Request cancelled by user".to_string(),
        }
    }

    #[test]
    fn insert_and_get_attempt() {
        let (ledger, _dir) = temp_ledger();
        ledger.insert(&attempt("ws_1", 0)).unwrap();

        let stored = ledger.get("ws_1").unwrap().unwrap();
        assert_eq!(stored.session_id, SESSION);
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert!(ledger.get("ws_missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_checkout_id_is_rejected() {
        let (ledger, _dir) = temp_ledger();
        ledger.insert(&attempt("ws_1", 0)).unwrap();
        assert!(matches!(
            ledger.insert(&attempt("ws_1", 0)),
            Err(LedgerError::Duplicate(_))
        ));
    }

    #[test]
    fn latest_for_session_is_newest_first() {
        let (ledger, _dir) = temp_ledger();
        ledger.insert(&attempt("ws_old", 300)).unwrap();
        ledger.insert(&attempt("ws_new", 10)).unwrap();
        ledger.insert(&attempt("ws_mid", 100)).unwrap();

        let latest = ledger.latest_for_session(SESSION).unwrap().unwrap();
        assert_eq!(latest.checkout_id, "ws_new");

        let by_reference = ledger.latest_for_reference(REFERENCE).unwrap().unwrap();
        assert_eq!(by_reference.checkout_id, "ws_new");

        assert!(ledger.latest_for_session("other-session").unwrap().is_none());
    }

    #[test]
    fn recent_pending_respects_window_and_status() {
        let (ledger, _dir) = temp_ledger();
        ledger.insert(&attempt("ws_stale", 600)).unwrap();
        let since = Utc::now() - Duration::seconds(120);
        assert!(ledger.find_recent_pending(SESSION, since).unwrap().is_none());

        ledger.insert(&attempt("ws_fresh", 5)).unwrap();
        let found = ledger.find_recent_pending(SESSION, since).unwrap().unwrap();
        assert_eq!(found.checkout_id, "ws_fresh");

        ledger.complete("ws_fresh", declined()).unwrap();
        assert!(ledger.find_recent_pending(SESSION, since).unwrap().is_none());
    }

    #[test]
    fn complete_is_applied_once() {
        let (ledger, _dir) = temp_ledger();
        ledger.insert(&attempt("ws_1", 0)).unwrap();

        let first = ledger.complete("ws_1", paid("ABC123")).unwrap();
        assert!(matches!(first, Completion::Applied(ref a) if a.status == PaymentStatus::Success));

        // Duplicate delivery and a contradicting late delivery both leave the row alone.
        let duplicate = ledger.complete("ws_1", paid("OTHER")).unwrap();
        assert!(matches!(duplicate, Completion::AlreadyTerminal(_)));
        let contradicting = ledger.complete("ws_1", declined()).unwrap();
        assert!(matches!(contradicting, Completion::AlreadyTerminal(_)));

        let stored = ledger.get("ws_1").unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(stored.gateway_receipt_code.as_deref(), Some("ABC123"));
    }

    #[test]
    fn complete_unknown_checkout_is_not_found() {
        let (ledger, _dir) = temp_ledger();
        assert_eq!(ledger.complete("ws_ghost", paid("X")).unwrap(), Completion::NotFound);
        assert!(ledger.get("ws_ghost").unwrap().is_none());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.redb");
        {
            let ledger = RedbLedger::open(&path).unwrap();
            ledger.insert(&attempt("ws_1", 0)).unwrap();
            ledger.complete("ws_1", paid("ABC123")).unwrap();
        }
        let ledger = RedbLedger::open(&path).unwrap();
        let stored = ledger.get("ws_1").unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        ledger.health_check().unwrap();
    }

    #[test]
    fn index_key_orders_newest_first() {
        let now = Utc::now();
        let older = make_index_key("s", now - Duration::seconds(5), "a");
        let newer = make_index_key("s", now, "b");
        assert!(newer < older);
    }
}
