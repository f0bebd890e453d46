// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment endpoints under `/v1/payments`.

use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{
        header::{CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::{ClientIdentity, Cookies, PeerAddr, ACCESS_COOKIE, CSRF_COOKIE, CSRF_HEADER},
    error::{ApiError, ErrorBody},
    payments::{parse_session_id, CallbackAck, PaymentStatus, StkCallbackEnvelope},
    state::AppState,
    storage::{AuditEvent, AuditEventType},
};

/// `Cache-Control` value for time-sensitive responses.
const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CsrfResponse {
    pub success: bool,
    /// Echo this value in the `X-CSRF-Token` header.
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// Document session being paid for (UUID).
    pub session_id: String,
    /// Local (`07XXXXXXXX` / `01XXXXXXXX`) or spaced phone number.
    pub phone_number: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitiateResponse {
    pub success: bool,
    #[serde(rename = "checkoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    /// An in-flight attempt was returned instead of a new charge.
    pub reused: bool,
    #[serde(
        rename = "customerMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub customer_message: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    /// Document session id (UUID).
    pub session_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    /// Shared webhook secret, when one is configured.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub success: bool,
    pub status: PaymentStatus,
    /// Gateway receipt code, present once paid.
    pub mpesa_code: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessResponse {
    pub success: bool,
    pub session_id: String,
}

fn session_from_query(
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::bad_request("sessionId is required"))?;
    Ok(parse_session_id(&query.session_id)?.to_string())
}

fn set_no_cache(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
}

#[utoipa::path(
    get,
    path = "/v1/payments/csrf",
    tag = "Payments",
    responses(
        (
            status = 200,
            description = "Token issued and set as the csrf_token cookie",
            body = CsrfResponse
        )
    )
)]
pub async fn issue_csrf(
    State(state): State<AppState>,
    ClientIdentity(client): ClientIdentity,
) -> Result<Response, ApiError> {
    let token = state.csrf.issue(Utc::now()).map_err(|e| {
        error!(error = %e, "failed to mint CSRF token");
        ApiError::internal("Could not start a payment session")
    })?;

    state
        .audit
        .record(AuditEvent::new(AuditEventType::CsrfIssued).with_client(&client));

    let mut response = Json(CsrfResponse {
        success: true,
        csrf_token: token.value.clone(),
        expires_at: token.expires_at,
    })
    .into_response();

    let cookie = HeaderValue::from_str(&state.csrf.set_cookie(&token))
        .map_err(|_| ApiError::internal("Could not start a payment session"))?;
    response.headers_mut().insert(SET_COOKIE, cookie);
    set_no_cache(response.headers_mut());
    Ok(response)
}

/// Start a payment.
///
/// Every call counts against the caller's rate limit, including rejected
/// ones. The CSRF header must match the `csrf_token` cookie.
#[utoipa::path(
    post,
    path = "/v1/payments/initiate",
    tag = "Payments",
    request_body = InitiateRequest,
    params(
        ("X-CSRF-Token" = String, Header, description = "Value of the csrf_token cookie")
    ),
    responses(
        (
            status = 200,
            description = "Charge prompt sent (or in-flight attempt reused)",
            body = InitiateResponse
        ),
        (status = 400, description = "Invalid phone number or session id", body = ErrorBody),
        (status = 403, description = "CSRF check failed", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody),
        (status = 500, description = "Payment gateway not configured", body = ErrorBody),
        (status = 502, description = "Gateway unavailable or rejected the charge", body = ErrorBody)
    )
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    ClientIdentity(client): ClientIdentity,
    cookies: Cookies,
    headers: HeaderMap,
    payload: Result<Json<InitiateRequest>, JsonRejection>,
) -> Result<Json<InitiateResponse>, ApiError> {
    if let Err(e) = state.rate_limiter.check(&client, Instant::now()) {
        state.audit.record(
            AuditEvent::new(AuditEventType::RateLimited)
                .with_client(&client)
                .failed(e.to_string()),
        );
        return Err(e.into());
    }

    let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = state.csrf.verify(cookies.get(CSRF_COOKIE), header, Utc::now()) {
        warn!(client = %client, reason = %e, "CSRF check failed");
        state.audit.record(
            AuditEvent::new(AuditEventType::CsrfRejected)
                .with_client(&client)
                .failed(e.to_string()),
        );
        return Err(e.into());
    }

    let Json(request) = payload
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e.body_text())))?;

    let initiation = state
        .orchestrator
        .initiate(&request.session_id, &request.phone_number, &client)
        .await?;

    Ok(Json(InitiateResponse {
        success: true,
        checkout_request_id: initiation.checkout_request_id,
        correlation_id: initiation.correlation_id,
        reused: initiation.reused,
        customer_message: initiation.customer_message,
    }))
}

/// Gateway webhook.
///
/// Unknown checkout ids and repeated deliveries are acknowledged so the
/// gateway does not retry them.
#[utoipa::path(
    post,
    path = "/v1/payments/callback",
    tag = "Payments",
    request_body = StkCallbackEnvelope,
    params(CallbackQuery),
    responses(
        (status = 200, description = "Delivery acknowledged", body = CallbackAck),
        (status = 400, description = "Malformed payload", body = ErrorBody),
        (status = 403, description = "Callback token or source rejected", body = ErrorBody)
    )
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    ClientIdentity(client): ClientIdentity,
    PeerAddr(peer): PeerAddr,
    payload: Result<Json<StkCallbackEnvelope>, JsonRejection>,
) -> Result<Json<CallbackAck>, ApiError> {
    if let Err(e) = state.callback_guard.check(query.token.as_deref(), peer) {
        warn!(client = %client, peer = ?peer, reason = %e, "callback rejected");
        state.audit.record(
            AuditEvent::new(AuditEventType::CallbackRejected)
                .with_client(&client)
                .failed(e.to_string()),
        );
        return Err(e.into());
    }

    let Json(envelope) = payload.map_err(|e| {
        warn!(client = %client, error = %e.body_text(), "malformed callback payload");
        ApiError::bad_request("Malformed callback payload")
    })?;

    state
        .orchestrator
        .handle_callback(&envelope.body.stk_callback, &client)?;

    Ok(Json(CallbackAck::accepted()))
}

/// Newest payment attempt for a session.
///
/// Never cached. A successful attempt with a receipt also sets the
/// `doc_access` cookie.
#[utoipa::path(
    get,
    path = "/v1/payments/status",
    tag = "Payments",
    params(SessionQuery),
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
        (status = 400, description = "Invalid session id", body = ErrorBody),
        (status = 404, description = "No attempt for the session", body = ErrorBody)
    )
)]
pub async fn payment_status(
    State(state): State<AppState>,
    ClientIdentity(client): ClientIdentity,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Response {
    let mut response = match status_response(&state, &client, query) {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    set_no_cache(response.headers_mut());
    response
}

fn status_response(
    state: &AppState,
    client: &str,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let session_id = session_from_query(query)?;
    let attempt = state.orchestrator.status(&session_id)?;

    let body = StatusResponse {
        success: true,
        status: attempt.status,
        mpesa_code: attempt.gateway_receipt_code.clone(),
        phone_number: Some(attempt.reported_phone().to_string()).filter(|p| !p.is_empty()),
    };
    let mut response = Json(body).into_response();

    if attempt.grants_access() {
        let token = state.access.issue(&attempt.session_id, Utc::now());
        let cookie = HeaderValue::from_str(&state.access.set_cookie(&token))
            .map_err(|_| ApiError::internal("Could not grant document access"))?;
        response.headers_mut().insert(SET_COOKIE, cookie);

        state.audit.record(
            AuditEvent::new(AuditEventType::AccessGranted)
                .with_session(&attempt.session_id)
                .with_checkout(&attempt.checkout_id)
                .with_user(state.orchestrator.owner_of(&attempt.session_id))
                .with_client(client),
        );
    }
    Ok(response)
}

/// Check the `doc_access` cookie for a session.
#[utoipa::path(
    get,
    path = "/v1/payments/access",
    tag = "Payments",
    params(SessionQuery),
    responses(
        (status = 200, description = "Access granted", body = AccessResponse),
        (
            status = 403,
            description = "Cookie missing, forged, expired or for another session",
            body = ErrorBody
        )
    )
)]
pub async fn verify_access(
    State(state): State<AppState>,
    cookies: Cookies,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<AccessResponse>, ApiError> {
    let session_id = session_from_query(query)?;
    state
        .access
        .verify(cookies.get(ACCESS_COOKIE), &session_id, Utc::now())?;
    Ok(Json(AccessResponse {
        success: true,
        session_id,
    }))
}
