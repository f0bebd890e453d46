// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound payment gateway integration.
//!
//! The orchestrator talks to the gateway through [`PaymentGateway`] so that
//! the HTTP client can be swapped for a scripted fake in tests.

use async_trait::async_trait;

pub mod daraja;
pub mod retry;
#[cfg(test)]
pub mod testing;

pub use daraja::{DarajaClient, DarajaConfig};
pub use retry::{retry, RetryPolicy};

/// A charge to push to the payer's phone.
#[derive(Debug, Clone, Copy)]
pub struct ChargeRequest<'a> {
    /// Canonical international-format payer phone.
    pub phone: &'a str,
    /// Fixed fee, integer currency units.
    pub amount: u64,
    /// Reference displayed on the payer's phone.
    pub account_reference: &'a str,
    pub description: &'a str,
}

/// Gateway acknowledgement that the charge prompt was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeAcknowledgement {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway configuration missing: {0}")]
    MissingConfig(String),

    #[error("gateway credential request failed: {0}")]
    Auth(String),

    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway rejected the charge: {description} ({code})")]
    Rejected { code: String, description: String },

    #[error("gateway response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Acquire a credential and submit the charge.
    async fn request_charge(
        &self,
        request: ChargeRequest<'_>,
    ) -> Result<ChargeAcknowledgement, GatewayError>;
}
