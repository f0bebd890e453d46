// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted payment attempt record and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Prefix of the human-readable account reference shown on the payer's phone.
const ACCOUNT_REFERENCE_PREFIX: &str = "DOC";

/// Hex characters of the session id carried in the account reference.
/// The gateway truncates references beyond 12 characters.
const ACCOUNT_REFERENCE_SESSION_CHARS: usize = 9;

/// Payment attempt lifecycle status.
///
/// `Pending` is the only non-terminal state. Transitions are
/// `Pending -> Success` or `Pending -> Failed`, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Charge prompt sent, waiting for the gateway webhook.
    Pending,
    /// Gateway confirmed the charge with a receipt code.
    Success,
    /// Gateway reported a failure, or confirmed without a receipt.
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// One charge request sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// `checkout_id:session_id:account_reference`.
    pub correlation_id: String,
    /// Gateway-issued checkout id (primary ledger key).
    pub checkout_id: String,
    /// Gateway-issued merchant request id.
    pub merchant_request_id: String,
    /// Document/session being purchased.
    pub session_id: String,
    /// Human-readable reference sent with the charge.
    pub account_reference: String,
    /// Fixed fee, integer currency units.
    pub amount: u64,
    /// Payer phone, canonical international form.
    pub phone: String,
    pub status: PaymentStatus,
    /// Receipt code; present iff `status == Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_receipt_code: Option<String>,
    /// Phone number echoed by the gateway on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Construct a freshly acknowledged attempt in `Pending`.
    pub fn new_pending(
        checkout_id: String,
        merchant_request_id: String,
        session_id: String,
        account_reference: String,
        amount: u64,
        phone: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: correlation_id(&checkout_id, &session_id, &account_reference),
            checkout_id,
            merchant_request_id,
            session_id,
            account_reference,
            amount,
            phone,
            status: PaymentStatus::Pending,
            gateway_receipt_code: None,
            confirmed_phone: None,
            result_code: None,
            result_description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Phone number to report back to the client.
    pub fn reported_phone(&self) -> &str {
        self.confirmed_phone.as_deref().unwrap_or(&self.phone)
    }

    /// Whether this attempt unlocks the document.
    pub fn grants_access(&self) -> bool {
        self.status == PaymentStatus::Success
            && self.gateway_receipt_code.is_some()
            && !self.reported_phone().is_empty()
    }
}

/// Terminal result applied to a pending attempt by the webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid {
        receipt_code: String,
        confirmed_phone: Option<String>,
        result_code: i64,
        result_description: String,
    },
    Declined {
        result_code: i64,
        result_description: String,
    },
}

impl PaymentOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Paid { .. } => PaymentStatus::Success,
            PaymentOutcome::Declined { .. } => PaymentStatus::Failed,
        }
    }

    /// Copy the outcome onto a pending attempt.
    pub fn apply_to(self, attempt: &mut PaymentAttempt) {
        attempt.status = self.status();
        match self {
            PaymentOutcome::Paid {
                receipt_code,
                confirmed_phone,
                result_code,
                result_description,
            } => {
                attempt.gateway_receipt_code = Some(receipt_code);
                attempt.confirmed_phone = confirmed_phone;
                attempt.result_code = Some(result_code);
                attempt.result_description = Some(result_description);
            }
            PaymentOutcome::Declined {
                result_code,
                result_description,
            } => {
                attempt.gateway_receipt_code = None;
                attempt.result_code = Some(result_code);
                attempt.result_description = Some(result_description);
            }
        }
        attempt.updated_at = Utc::now();
    }
}

pub fn correlation_id(checkout_id: &str, session_id: &str, account_reference: &str) -> String {
    format!("{checkout_id}:{session_id}:{account_reference}")
}

/// Derive the account reference for a session, e.g. `DOC3F4D6542B`.
pub fn account_reference(session_id: &Uuid) -> String {
    let simple = session_id.simple().to_string().to_ascii_uppercase();
    format!(
        "{ACCOUNT_REFERENCE_PREFIX}{}",
        &simple[..ACCOUNT_REFERENCE_SESSION_CHARS]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PaymentAttempt {
        PaymentAttempt::new_pending(
            "ws_1".to_string(),
            "mr_1".to_string(),
            "3f4d6542-b8ce-4226-93d3-80d6f14d6db2".to_string(),
            "DOC3F4D6542B".to_string(),
            50,
            "254727921038".to_string(),
        )
    }

    #[test]
    fn new_attempt_is_pending_without_receipt() {
        let attempt = pending();
        assert_eq!(attempt.status, PaymentStatus::Pending);
        assert!(attempt.gateway_receipt_code.is_none());
        assert!(attempt.correlation_id.contains("ws_1"));
        assert!(attempt
            .correlation_id
            .contains("3f4d6542-b8ce-4226-93d3-80d6f14d6db2"));
        assert!(!attempt.grants_access());
    }

    #[test]
    fn account_reference_fits_gateway_limit() {
        let session = Uuid::parse_str("3f4d6542-b8ce-4226-93d3-80d6f14d6db2").unwrap();
        let reference = account_reference(&session);
        assert_eq!(reference, "DOC3F4D6542B");
        assert!(reference.len() <= 12);
    }

    #[test]
    fn paid_outcome_sets_receipt() {
        let mut attempt = pending();
        PaymentOutcome::Paid {
            receipt_code: "ABC123".to_string(),
            confirmed_phone: Some("254727921038".to_string()),
            result_code: 0,
            result_description: "ok".to_string(),
        }
        .apply_to(&mut attempt);

        assert_eq!(attempt.status, PaymentStatus::Success);
        assert_eq!(attempt.gateway_receipt_code.as_deref(), Some("ABC123"));
        assert!(attempt.grants_access());
    }

    #[test]
    fn declined_outcome_never_carries_receipt() {
        let mut attempt = pending();
        PaymentOutcome::Declined {
            result_code: 1032,
            result_description: "Request cancelled by user".to_string(),
        }
        .apply_to(&mut attempt);

        assert_eq!(attempt.status, PaymentStatus::Failed);
        assert!(attempt.gateway_receipt_code.is_none());
        assert!(!attempt.grants_access());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}
