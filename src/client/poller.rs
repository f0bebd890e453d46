// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Confirmation Poller
//!
//! Client side of the payment flow, driven against the HTTP surface:
//!
//! 1. Normalize the phone locally; an invalid number never reaches the
//!    network.
//! 2. Fetch a CSRF token (taken from the `csrf_token` cookie).
//! 3. Initiate the charge.
//! 4. Every `poll_interval`, read the status until it is terminal or
//!    `timeout` elapses. A 404, a 5xx or a transport error counts as
//!    still pending.
//! 5. On success, take the `doc_access` cookie and confirm it against the
//!    access endpoint.
//!
//! The loop is sequential and stops at the next iteration once its
//! `CancellationToken` is cancelled. A timeout leaves the server-side
//! attempt untouched; the charge may still complete afterwards.

use std::time::Duration;

use reqwest::{header::SET_COOKIE, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::payments::{CsrfResponse, InitiateResponse, StatusResponse};
use crate::auth::{ACCESS_COOKIE, CSRF_COOKIE, CSRF_HEADER};
use crate::error::ErrorBody;
use crate::payments::{normalize_phone, PaymentStatus, PhoneError};

/// Default interval between status reads.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default wall-clock budget for the whole confirmation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout of the initiate call. Covers the server's token and charge
/// calls with one retry each.
const DEFAULT_INITIATE_TIMEOUT: Duration = Duration::from_secs(65);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Capped to whatever remains of `timeout`.
    pub request_timeout: Duration,
    /// Timeout of the initiate call, also capped to what remains of `timeout`.
    pub initiate_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            initiate_timeout: DEFAULT_INITIATE_TIMEOUT,
        }
    }
}

/// A confirmed, unlocked payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub checkout_request_id: String,
    pub correlation_id: String,
    pub receipt_code: String,
    pub phone_number: String,
    /// Value of the `doc_access` cookie.
    pub access_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(#[from] PhoneError),

    #[error("server rejected the request ({status}, {error_code}): {message}")]
    Rejected {
        status: u16,
        error_code: String,
        message: String,
    },

    #[error("payment failed")]
    PaymentFailed { checkout_request_id: String },

    #[error("no confirmation within {0:?}")]
    TimedOut(Duration),

    #[error("confirmation cancelled")]
    Cancelled,

    #[error("document access was not granted")]
    AccessDenied,

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl PollError {
    /// Copy shown to the payer. Failure, timeout and bad input each get
    /// their own wording so a slow but successful charge is not retried as
    /// if it had failed.
    pub fn user_message(&self) -> String {
        match self {
            PollError::InvalidPhone(_) => {
                "Enter a valid Safaricom number (07XXXXXXXX or 01XXXXXXXX).".to_string()
            }
            PollError::PaymentFailed { .. } => {
                "Payment failed and no receipt was captured. Please try again.".to_string()
            }
            PollError::TimedOut(_) => "This is taking longer than expected. If you approved the \
                 prompt on your phone, wait a moment before retrying."
                .to_string(),
            PollError::Rejected { message, .. } => message.clone(),
            PollError::Cancelled => "Payment confirmation was cancelled.".to_string(),
            PollError::AccessDenied => {
                "Payment received but the document could not be unlocked. Please refresh."
                    .to_string()
            }
            PollError::Transport(_) | PollError::InvalidResponse(_) => {
                "Could not reach the payment service. Please try again.".to_string()
            }
        }
    }
}

/// One status read, as the loop sees it.
enum Poll {
    Pending,
    Paid {
        receipt_code: String,
        phone_number: String,
        access_token: String,
    },
    Failed,
}

pub struct ConfirmationPoller {
    http: reqwest::Client,
    base_url: String,
    config: PollerConfig,
}

impl ConfirmationPoller {
    pub fn new(base_url: impl Into<String>, config: PollerConfig) -> Result<Self, PollError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/payments/{}", self.base_url, path)
    }

    /// Run the full flow for one session.
    pub async fn confirm(
        &self,
        session_id: &str,
        raw_phone: &str,
        cancel: &CancellationToken,
    ) -> Result<PaymentConfirmation, PollError> {
        // The server accepts only the local form; normalizing here just
        // rejects bad input before any request is made.
        normalize_phone(raw_phone)?;
        let local_phone: String = raw_phone.chars().filter(|c| !c.is_whitespace()).collect();
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let csrf = self.fetch_csrf().await?;
        let initiated = self
            .initiate(session_id, &local_phone, &csrf, deadline)
            .await?;
        info!(
            session_id,
            checkout_id = %initiated.checkout_request_id,
            reused = initiated.reused,
            "payment initiated; waiting for confirmation"
        );

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    session_id,
                    checkout_id = %initiated.checkout_request_id,
                    attempts = attempt,
                    "confirmation timed out; attempt left pending"
                );
                return Err(PollError::TimedOut(self.config.timeout));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval.min(remaining)) => {},
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }
            attempt += 1;

            match self.poll_status(session_id, remaining).await? {
                Poll::Pending => {
                    debug!(session_id, attempt, "payment still pending");
                }
                Poll::Failed => {
                    info!(session_id, attempt, "payment reported failed");
                    return Err(PollError::PaymentFailed {
                        checkout_request_id: initiated.checkout_request_id,
                    });
                }
                Poll::Paid {
                    receipt_code,
                    phone_number,
                    access_token,
                } => {
                    self.confirm_access(session_id, &access_token).await?;
                    info!(session_id, attempt, "payment confirmed; document unlocked");
                    return Ok(PaymentConfirmation {
                        checkout_request_id: initiated.checkout_request_id,
                        correlation_id: initiated.correlation_id,
                        receipt_code,
                        phone_number,
                        access_token,
                    });
                }
            }
        }
    }

    async fn fetch_csrf(&self) -> Result<String, PollError> {
        let response = self.http.get(self.url("csrf")).send().await?;
        let response = error_for_status(response).await?;

        if let Some(token) = cookie_value(&response, CSRF_COOKIE) {
            return Ok(token);
        }
        let body: CsrfResponse = response.json().await?;
        Ok(body.csrf_token)
    }

    async fn initiate(
        &self,
        session_id: &str,
        phone: &str,
        csrf: &str,
        deadline: Instant,
    ) -> Result<InitiateResponse, PollError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = self
            .http
            .post(self.url("initiate"))
            .header(reqwest::header::COOKIE, format!("{CSRF_COOKIE}={csrf}"))
            .header(CSRF_HEADER, csrf)
            .json(&serde_json::json!({
                "sessionId": session_id,
                "phoneNumber": phone,
            }))
            .timeout(self.config.initiate_timeout.min(remaining))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            // The charge may still go through on the server; this is not a
            // failure the payer should retry blindly.
            Err(e) if e.is_timeout() => {
                warn!(session_id, "initiation did not answer within the budget");
                return Err(PollError::TimedOut(self.config.timeout));
            }
            Err(e) => return Err(e.into()),
        };
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }

    async fn poll_status(&self, session_id: &str, remaining: Duration) -> Result<Poll, PollError> {
        let result = self
            .http
            .get(self.url("status"))
            .query(&[("sessionId", session_id)])
            .timeout(self.config.request_timeout.min(remaining))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(session_id, error = %e, "status request failed; treating as pending");
                return Ok(Poll::Pending);
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            debug!(session_id, status = status.as_u16(), "status not available yet");
            return Ok(Poll::Pending);
        }

        let access_token = cookie_value(&response, ACCESS_COOKIE);
        let response = error_for_status(response).await?;
        let body: StatusResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(session_id, error = %e, "unreadable status body; treating as pending");
                return Ok(Poll::Pending);
            }
        };

        match body.status {
            PaymentStatus::Pending => Ok(Poll::Pending),
            PaymentStatus::Failed => Ok(Poll::Failed),
            PaymentStatus::Success => match (body.mpesa_code, body.phone_number) {
                (Some(receipt_code), Some(phone_number)) => {
                    let access_token = access_token.ok_or_else(|| {
                        PollError::InvalidResponse("success without an access cookie".to_string())
                    })?;
                    Ok(Poll::Paid {
                        receipt_code,
                        phone_number,
                        access_token,
                    })
                }
                _ => Ok(Poll::Pending),
            },
        }
    }

    async fn confirm_access(&self, session_id: &str, token: &str) -> Result<(), PollError> {
        let response = self
            .http
            .get(self.url("access"))
            .query(&[("sessionId", session_id)])
            .header(reqwest::header::COOKIE, format!("{ACCESS_COOKIE}={token}"))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            warn!(
                session_id,
                status = response.status().as_u16(),
                "access cookie was not accepted"
            );
            Err(PollError::AccessDenied)
        }
    }
}

/// Value of `name` from the response's `Set-Cookie` headers.
fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| {
            let (key, value) = v.split(';').next()?.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

/// Turn a non-2xx response into [`PollError::Rejected`] using the server's
/// error body when it has one.
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, PollError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let (error_code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => (error.error_code, error.error),
        Err(_) => ("unknown".to_string(), body),
    };
    Err(PollError::Rejected {
        status: status.as_u16(),
        error_code,
        message,
    })
}
