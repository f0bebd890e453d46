// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::auth::GuardError;
use crate::payments::PaymentError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
    /// Seconds for the `Retry-After` header.
    pub retry_after: Option<u64>,
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    pub error: String,
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_code,
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn forbidden(error_code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<PaymentError> for ApiError {
    fn from(error: PaymentError) -> Self {
        let code = error.error_code();
        match error {
            PaymentError::Configuration(detail) => {
                error!(detail = %detail, "payment gateway is not configured");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Payments are not available right now",
                )
            }
            PaymentError::Validation(message) => Self::new(StatusCode::BAD_REQUEST, code, message),
            PaymentError::GatewayTransient(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                code,
                "The payment service is temporarily unavailable. Please try again.",
            ),
            PaymentError::GatewayRejected(detail) => Self::new(
                StatusCode::BAD_GATEWAY,
                code,
                format!("The payment request was rejected: {detail}"),
            ),
            PaymentError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, code, message),
            PaymentError::Storage(e) => {
                error!(error = %e, "payment ledger failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Internal error, please try again",
                )
            }
            PaymentError::Internal(detail) => {
                error!(detail = %detail, "payment initiation failed internally");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Internal error, please try again",
                )
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(error: GuardError) -> Self {
        let code = error.error_code();
        let message = error.user_message();
        match error {
            GuardError::RateLimited { retry_after_secs } => Self {
                retry_after: Some(retry_after_secs),
                ..Self::new(StatusCode::TOO_MANY_REQUESTS, code, message)
            },
            _ => Self::forbidden(code, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            success: false,
            error: self.message,
            error_code: self.error_code.to_string(),
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
