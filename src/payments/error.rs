// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy of the payment flow.

use crate::providers::GatewayError;
use crate::storage::LedgerError;

use super::phone::PhoneError;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Gateway credentials or other mandatory settings are missing.
    #[error("payment gateway is not configured: {0}")]
    Configuration(String),

    /// Malformed phone number or session id.
    #[error("{0}")]
    Validation(String),

    /// Token or charge call failed after its retry.
    #[error("payment gateway unavailable: {0}")]
    GatewayTransient(String),

    /// Gateway explicitly refused the charge.
    #[error("payment request rejected by gateway: {0}")]
    GatewayRejected(String),

    /// No attempt exists for the session.
    #[error("{0}")]
    NotFound(String),

    #[error("payment ledger error: {0}")]
    Storage(#[from] LedgerError),

    /// The initiation task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PhoneError> for PaymentError {
    fn from(error: PhoneError) -> Self {
        PaymentError::Validation(format!("Enter a valid phone number: {error}"))
    }
}

impl From<GatewayError> for PaymentError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::MissingConfig(name) => PaymentError::Configuration(name),
            GatewayError::Rejected { code, description } => {
                PaymentError::GatewayRejected(format!("{description} ({code})"))
            }
            other => PaymentError::GatewayTransient(other.to_string()),
        }
    }
}

impl PaymentError {
    /// Stable machine-readable code returned to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentError::Configuration(_) => "configuration_error",
            PaymentError::Validation(_) => "validation_error",
            PaymentError::GatewayTransient(_) => "gateway_unavailable",
            PaymentError::GatewayRejected(_) => "gateway_rejected",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::Storage(_) => "storage_error",
            PaymentError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_taxonomy() {
        let rejected: PaymentError = GatewayError::Rejected {
            code: "400.002.02".to_string(),
            description: "Invalid Amount".to_string(),
        }
        .into();
        assert_eq!(rejected.error_code(), "gateway_rejected");

        let transient: PaymentError = GatewayError::Transport("timed out".to_string()).into();
        assert_eq!(transient.error_code(), "gateway_unavailable");

        let config: PaymentError =
            GatewayError::MissingConfig("MPESA_PASSKEY".to_string()).into();
        assert_eq!(config.error_code(), "configuration_error");
    }

    #[test]
    fn phone_errors_are_validation_errors() {
        let error: PaymentError = PhoneError::WrongPrefix.into();
        assert_eq!(error.error_code(), "validation_error");
        assert!(error.to_string().starts_with("Enter a valid phone number"));
    }
}
