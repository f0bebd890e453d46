// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::ErrorBody,
    payments::{
        callback::{CallbackItem, CallbackMetadata, StkCallback, StkCallbackBody},
        CallbackAck, PaymentStatus, StkCallbackEnvelope,
    },
    state::AppState,
};

pub mod health;
pub mod payments;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/payments/csrf", get(payments::issue_csrf))
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/callback", post(payments::payment_callback))
        .route("/payments/status", get(payments::payment_status))
        .route("/payments/access", get(payments::verify_access))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        payments::issue_csrf,
        payments::initiate_payment,
        payments::payment_callback,
        payments::payment_status,
        payments::verify_access,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            payments::CsrfResponse,
            payments::InitiateRequest,
            payments::InitiateResponse,
            payments::StatusResponse,
            payments::AccessResponse,
            PaymentStatus,
            StkCallbackEnvelope,
            StkCallbackBody,
            StkCallback,
            CallbackMetadata,
            CallbackItem,
            CallbackAck,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Payments", description = "Document unlock payments"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
struct ApiDoc;
