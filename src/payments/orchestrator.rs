// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment state machine: `NoAttempt -> Pending -> {Success, Failed}`.
//!
//! Three entry points drive it:
//!
//! - [`PaymentOrchestrator::initiate`] reuses a recent pending attempt for the
//!   session or pushes a new charge and records it as pending.
//! - [`PaymentOrchestrator::handle_callback`] applies the gateway's verdict to
//!   the pending attempt with the same checkout id, at most once.
//! - [`PaymentOrchestrator::status`] returns the newest attempt for a session.
//!
//! Nothing is persisted when the gateway refuses or cannot be reached, and
//! there is no retry at this layer; the client re-initiates, which the
//! idempotency window makes safe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::providers::{ChargeRequest, PaymentGateway};
use crate::storage::{
    AuditEvent, AuditEventType, AuditSink, Completion, PaymentLedger, SessionDirectory,
};

use super::callback::StkCallback;
use super::error::PaymentError;
use super::model::{account_reference, PaymentAttempt};
use super::phone::normalize_phone;

/// Fixed settings of the flow.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fee in whole currency units.
    pub amount: u64,
    pub description: String,
    /// A pending attempt younger than this is returned instead of charging again.
    pub idempotency_window: Duration,
}

/// Accepted initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiation {
    pub correlation_id: String,
    pub checkout_request_id: String,
    /// `true` when an in-flight attempt was returned without a new charge.
    pub reused: bool,
    pub customer_message: Option<String>,
}

/// What a webhook delivery did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackDisposition {
    Applied(PaymentAttempt),
    /// Attempt was already terminal; left unchanged.
    Duplicate(PaymentAttempt),
    /// No attempt carries the checkout id.
    Unmatched,
}

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// Handle on a session's initiation lock. The map entry is dropped with the
/// last handle, however the holder exits.
struct SessionSlot<'a> {
    locks: &'a Mutex<HashMap<String, SessionLock>>,
    session_id: String,
    lock: SessionLock,
}

impl Drop for SessionSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.session_id);
        }
    }
}

pub struct PaymentOrchestrator {
    ledger: Arc<dyn PaymentLedger>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    audit: Arc<dyn AuditSink>,
    sessions: Arc<dyn SessionDirectory>,
    config: OrchestratorConfig,
    session_locks: Mutex<HashMap<String, SessionLock>>,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        audit: Arc<dyn AuditSink>,
        sessions: Arc<dyn SessionDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            audit,
            sessions,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn PaymentLedger> {
        &self.ledger
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn owner_of(&self, session_id: &str) -> Option<String> {
        self.sessions.owner_of(session_id)
    }

    // =========================================================================
    // Initiate
    // =========================================================================

    /// Start (or resume) a payment for `session_id`.
    ///
    /// The work runs on its own task, so once the gateway has been asked to
    /// charge the attempt is recorded even if the caller goes away. Requests
    /// for one session are serialized, so racing double-submits produce a
    /// single gateway call.
    pub async fn initiate(
        self: &Arc<Self>,
        session_id: &str,
        raw_phone: &str,
        client: &str,
    ) -> Result<Initiation, PaymentError> {
        let session = parse_session_id(session_id)?;
        let this = Arc::clone(self);
        let raw_phone = raw_phone.to_string();
        let client = client.to_string();

        let task = tokio::spawn(async move {
            this.initiate_serialized(session, &raw_phone, &client)
                .await
        });
        task.await.map_err(|e| {
            error!(session_id = %session, error = %e, "initiation task failed");
            PaymentError::Internal(e.to_string())
        })?
    }

    async fn initiate_serialized(
        &self,
        session: Uuid,
        raw_phone: &str,
        client: &str,
    ) -> Result<Initiation, PaymentError> {
        let session_id = session.to_string();
        let result = {
            let slot = self.session_slot(&session_id);
            let _guard = slot.lock.lock().await;
            self.initiate_locked(&session, &session_id, raw_phone, client)
                .await
        };

        if let Err(e) = &result {
            self.audit.record(
                AuditEvent::new(AuditEventType::InitiationFailed)
                    .with_session(&session_id)
                    .with_user(self.sessions.owner_of(&session_id))
                    .with_client(client)
                    .with_details(json!({ "error_code": e.error_code() }))
                    .failed(e.to_string()),
            );
        }
        result
    }

    async fn initiate_locked(
        &self,
        session: &Uuid,
        session_id: &str,
        raw_phone: &str,
        client: &str,
    ) -> Result<Initiation, PaymentError> {
        let since = Utc::now()
            - chrono::Duration::from_std(self.config.idempotency_window)
                .unwrap_or_else(|_| chrono::Duration::zero());

        if let Some(existing) = self.ledger.find_recent_pending(session_id, since)? {
            info!(
                session_id,
                checkout_id = %existing.checkout_id,
                "reusing in-flight payment attempt"
            );
            self.audit.record(
                AuditEvent::new(AuditEventType::InitiationReused)
                    .with_session(session_id)
                    .with_checkout(&existing.checkout_id)
                    .with_user(self.sessions.owner_of(session_id))
                    .with_client(client),
            );
            return Ok(Initiation {
                correlation_id: existing.correlation_id,
                checkout_request_id: existing.checkout_id,
                reused: true,
                customer_message: None,
            });
        }

        let phone = normalize_phone(raw_phone)?;

        let gateway = self.gateway.as_ref().ok_or_else(|| {
            PaymentError::Configuration("gateway credentials are not set".to_string())
        })?;

        let reference = account_reference(session);
        let acknowledgement = gateway
            .request_charge(ChargeRequest {
                phone: phone.as_str(),
                amount: self.config.amount,
                account_reference: &reference,
                description: &self.config.description,
            })
            .await
            .map_err(|e| {
                warn!(session_id, error = %e, "charge request failed");
                PaymentError::from(e)
            })?;

        let attempt = PaymentAttempt::new_pending(
            acknowledgement.checkout_request_id.clone(),
            acknowledgement.merchant_request_id,
            session_id.to_string(),
            reference,
            self.config.amount,
            phone.into_inner(),
        );

        if let Err(e) = self.ledger.insert(&attempt) {
            // The customer already has a prompt on their phone; keep enough
            // context in the logs to reconcile by hand.
            error!(
                session_id,
                checkout_id = %attempt.checkout_id,
                error = %e,
                "failed to record acknowledged charge"
            );
            return Err(e.into());
        }

        info!(
            session_id,
            checkout_id = %attempt.checkout_id,
            amount = attempt.amount,
            "payment attempt pending"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::InitiationAccepted)
                .with_session(session_id)
                .with_checkout(&attempt.checkout_id)
                .with_user(self.sessions.owner_of(session_id))
                .with_client(client)
                .with_details(json!({
                    "amount": attempt.amount,
                    "account_reference": attempt.account_reference,
                })),
        );

        Ok(Initiation {
            correlation_id: attempt.correlation_id,
            checkout_request_id: attempt.checkout_id,
            reused: false,
            customer_message: acknowledgement.customer_message,
        })
    }

    fn session_slot(&self, session_id: &str) -> SessionSlot<'_> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(session_id.to_string()).or_default().clone();
        SessionSlot {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            lock,
        }
    }

    // =========================================================================
    // Callback
    // =========================================================================

    /// Apply a gateway webhook delivery.
    ///
    /// Unknown checkout ids and repeated deliveries are not errors; the
    /// gateway is always acknowledged so it does not retry.
    pub fn handle_callback(
        &self,
        callback: &StkCallback,
        client: &str,
    ) -> Result<CallbackDisposition, PaymentError> {
        let checkout_id = callback.checkout_request_id.trim();
        let outcome = callback.outcome();
        let status = outcome.status();

        let disposition = match self.ledger.complete(checkout_id, outcome)? {
            Completion::Applied(attempt) => {
                info!(
                    checkout_id,
                    session_id = %attempt.session_id,
                    status = ?attempt.status,
                    result_code = callback.result_code,
                    "payment attempt settled"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventType::CallbackApplied)
                        .with_session(&attempt.session_id)
                        .with_checkout(checkout_id)
                        .with_user(self.sessions.owner_of(&attempt.session_id))
                        .with_client(client)
                        .with_details(json!({
                            "status": attempt.status,
                            "result_code": callback.result_code,
                            "result_description": callback.result_desc,
                            "receipt_code": attempt.gateway_receipt_code,
                        })),
                );
                CallbackDisposition::Applied(attempt)
            }
            Completion::AlreadyTerminal(attempt) => {
                info!(
                    checkout_id,
                    stored = ?attempt.status,
                    delivered = ?status,
                    "ignoring callback for settled attempt"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventType::CallbackDuplicate)
                        .with_session(&attempt.session_id)
                        .with_checkout(checkout_id)
                        .with_client(client)
                        .with_details(json!({
                            "stored_status": attempt.status,
                            "delivered_status": status,
                        })),
                );
                CallbackDisposition::Duplicate(attempt)
            }
            Completion::NotFound => {
                warn!(
                    checkout_id,
                    result_code = callback.result_code,
                    "callback does not match any payment attempt"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventType::CallbackUnmatched)
                        .with_checkout(checkout_id)
                        .with_client(client)
                        .with_details(json!({
                            "result_code": callback.result_code,
                            "account_reference": callback.account_reference(),
                        }))
                        .failed("no payment attempt for checkout id"),
                );
                CallbackDisposition::Unmatched
            }
        };
        Ok(disposition)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Newest attempt for the session, falling back to the account reference
    /// derived from it.
    pub fn status(&self, session_id: &str) -> Result<PaymentAttempt, PaymentError> {
        let session = parse_session_id(session_id)?;
        let session_id = session.to_string();

        if let Some(attempt) = self.ledger.latest_for_session(&session_id)? {
            return Ok(attempt);
        }
        if let Some(attempt) = self.ledger.latest_for_reference(&account_reference(&session))? {
            return Ok(attempt);
        }
        Err(PaymentError::NotFound(
            "No payment found for this session".to_string(),
        ))
    }
}

/// Session ids are UUIDs; the hyphenated lowercase form is canonical.
pub fn parse_session_id(raw: &str) -> Result<Uuid, PaymentError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| PaymentError::Validation("Invalid session id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::callback::StkCallbackEnvelope;
    use crate::payments::model::PaymentStatus;
    use crate::providers::testing::ScriptedGateway;
    use crate::providers::GatewayError;
    use crate::storage::audit::testing::RecordingAuditSink;
    use crate::storage::{InMemorySessionDirectory, RedbLedger};
    use serde_json::Value;

    const SESSION: &str = "3f4d6542-b8ce-4226-93d3-80d6f14d6db2";

    struct Harness {
        orchestrator: Arc<PaymentOrchestrator>,
        gateway: Arc<ScriptedGateway>,
        audit: Arc<RecordingAuditSink>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(gateway: ScriptedGateway, configured: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(RedbLedger::open(&dir.path().join("ledger.redb")).unwrap());
        let gateway = Arc::new(gateway);
        let audit = Arc::new(RecordingAuditSink::default());
        let sessions = Arc::new(InMemorySessionDirectory::new());
        sessions.register(SESSION, "user_42");

        let orchestrator = PaymentOrchestrator::new(
            ledger,
            configured.then(|| gateway.clone() as Arc<dyn PaymentGateway>),
            audit.clone(),
            sessions,
            OrchestratorConfig {
                amount: 50,
                description: "Document unlock".to_string(),
                idempotency_window: Duration::from_secs(120),
            },
        );
        Harness {
            orchestrator: Arc::new(orchestrator),
            gateway,
            audit,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedGateway::default(), true)
    }

    fn callback(value: Value) -> StkCallback {
        serde_json::from_value::<StkCallbackEnvelope>(value)
            .unwrap()
            .body
            .stk_callback
    }

    fn success_callback(checkout_id: &str, receipt: &str) -> StkCallback {
        callback(json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "mr_1",
                "CheckoutRequestID": checkout_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "Amount", "Value": 50 },
                    { "Name": "MpesaReceiptNumber", "Value": receipt },
                    { "Name": "PhoneNumber", "Value": 254727921038u64 }
                ] }
            } }
        }))
    }

    fn failed_callback(checkout_id: &str) -> StkCallback {
        callback(json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": checkout_id,
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            } }
        }))
    }

    #[tokio::test]
    async fn full_payment_scenario() {
        let h = harness();
        let initiation = h
            .orchestrator
            .initiate(SESSION, "0727921038", "203.0.113.7")
            .await
            .unwrap();
        assert_eq!(initiation.checkout_request_id, "ws_1");
        assert!(initiation.correlation_id.contains("ws_1"));
        assert!(!initiation.reused);

        let pending = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(pending.status, PaymentStatus::Pending);
        assert_eq!(pending.phone, "254727921038");
        assert_eq!(h.gateway.phones(), vec!["254727921038".to_string()]);

        let disposition = h
            .orchestrator
            .handle_callback(&success_callback("ws_1", "ABC123"), "196.201.214.200")
            .unwrap();
        assert!(matches!(disposition, CallbackDisposition::Applied(_)));

        let settled = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);
        assert_eq!(settled.gateway_receipt_code.as_deref(), Some("ABC123"));
        assert!(settled.grants_access());

        assert_eq!(
            h.audit.event_types(),
            vec![AuditEventType::InitiationAccepted, AuditEventType::CallbackApplied]
        );
        assert_eq!(h.audit.events()[0].user_id.as_deref(), Some("user_42"));
    }

    #[tokio::test]
    async fn repeated_initiation_reuses_pending_attempt() {
        let h = harness();
        let first = h
            .orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();
        let second = h
            .orchestrator
            .initiate(SESSION, "0727 921 038", "c")
            .await
            .unwrap();

        assert_eq!(first.correlation_id, second.correlation_id);
        assert!(second.reused);
        assert_eq!(h.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_initiations_charge_once() {
        let h = harness_with(ScriptedGateway::with_delay(Duration::from_millis(50)), true);

        let a = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.initiate(SESSION, "0727921038", "c").await })
        };
        let b = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.initiate(SESSION, "0727921038", "c").await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.correlation_id, b.correlation_id);
        assert_eq!(h.gateway.calls(), 1);
        assert!(h.orchestrator.session_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_initiation_still_records_attempt() {
        let h = harness_with(ScriptedGateway::with_delay(Duration::from_millis(100)), true);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            h.orchestrator.initiate(SESSION, "0727921038", "c"),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let attempt = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(attempt.status, PaymentStatus::Pending);
        assert_eq!(attempt.checkout_id, "ws_1");
        assert_eq!(h.gateway.calls(), 1);
        assert!(h.orchestrator.session_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn session_slot_is_released_by_last_holder() {
        let h = harness();
        let first = h.orchestrator.session_slot(SESSION);
        let second = h.orchestrator.session_slot(SESSION);

        drop(second);
        assert!(h
            .orchestrator
            .session_locks
            .lock()
            .unwrap()
            .contains_key(SESSION));

        drop(first);
        assert!(h.orchestrator.session_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn settled_attempt_allows_a_new_charge() {
        let h = harness();
        h.orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();
        h.orchestrator
            .handle_callback(&failed_callback("ws_1"), "g")
            .unwrap();
        // Index keys have millisecond resolution.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let retry = h
            .orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();
        assert_eq!(retry.checkout_request_id, "ws_2");
        assert!(!retry.reused);
        assert_eq!(
            h.orchestrator.status(SESSION).unwrap().checkout_id,
            "ws_2"
        );
    }

    #[tokio::test]
    async fn gateway_failure_persists_nothing() {
        let h = harness_with(
            ScriptedGateway::failing_with(GatewayError::Rejected {
                code: "400.002.02".to_string(),
                description: "Invalid Amount".to_string(),
            }),
            true,
        );

        let error = h
            .orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "gateway_rejected");
        assert!(matches!(
            h.orchestrator.status(SESSION),
            Err(PaymentError::NotFound(_))
        ));
        assert_eq!(h.audit.event_types(), vec![AuditEventType::InitiationFailed]);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_gateway() {
        let h = harness();

        let bad_phone = h
            .orchestrator
            .initiate(SESSION, "0712", "c")
            .await
            .unwrap_err();
        assert!(matches!(bad_phone, PaymentError::Validation(_)));

        let bad_session = h
            .orchestrator
            .initiate("not-a-uuid", "0727921038", "c")
            .await
            .unwrap_err();
        assert!(matches!(bad_session, PaymentError::Validation(_)));

        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn unconfigured_gateway_is_configuration_error() {
        let h = harness_with(ScriptedGateway::default(), false);
        let error = h
            .orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap_err();
        assert!(matches!(error, PaymentError::Configuration(_)));
        assert!(!h.orchestrator.gateway_configured());
    }

    #[tokio::test]
    async fn unknown_checkout_is_acknowledged_without_mutation() {
        let h = harness();
        h.orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();

        let disposition = h
            .orchestrator
            .handle_callback(&success_callback("ws_ghost", "ZZZ999"), "g")
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::Unmatched);
        assert!(h.orchestrator.ledger().get("ws_ghost").unwrap().is_none());
        assert_eq!(
            h.orchestrator.status(SESSION).unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let h = harness();
        h.orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();
        h.orchestrator
            .handle_callback(&success_callback("ws_1", "ABC123"), "g")
            .unwrap();

        let duplicate = h
            .orchestrator
            .handle_callback(&success_callback("ws_1", "OTHER1"), "g")
            .unwrap();
        assert!(matches!(duplicate, CallbackDisposition::Duplicate(_)));
        let late_failure = h
            .orchestrator
            .handle_callback(&failed_callback("ws_1"), "g")
            .unwrap();
        assert!(matches!(late_failure, CallbackDisposition::Duplicate(_)));

        let stored = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(stored.gateway_receipt_code.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn success_code_without_receipt_fails_attempt() {
        let h = harness();
        h.orchestrator
            .initiate(SESSION, "0727921038", "c")
            .await
            .unwrap();

        let no_receipt = callback(json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "PhoneNumber", "Value": 254727921038u64 }
                ] }
            } }
        }));
        h.orchestrator.handle_callback(&no_receipt, "g").unwrap();

        let stored = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert!(stored.gateway_receipt_code.is_none());
        assert!(!stored.grants_access());
    }

    #[tokio::test]
    async fn status_for_unknown_session_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.status("0b8a1c3e-0000-4000-8000-000000000000"),
            Err(PaymentError::NotFound(_))
        ));
        assert!(matches!(
            h.orchestrator.status("garbage"),
            Err(PaymentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn status_falls_back_to_account_reference() {
        let h = harness();
        // An attempt recorded under a non-canonical session id spelling.
        let session = parse_session_id(SESSION).unwrap();
        let attempt = PaymentAttempt::new_pending(
            "ws_legacy".to_string(),
            "mr_legacy".to_string(),
            SESSION.to_uppercase(),
            account_reference(&session),
            50,
            "254727921038".to_string(),
        );
        h.orchestrator.ledger().insert(&attempt).unwrap();

        let found = h.orchestrator.status(SESSION).unwrap();
        assert_eq!(found.checkout_id, "ws_legacy");
    }
}
