// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! [`AppState::initialize`] starts with an empty [`InMemorySessionDirectory`]:
//! no login system registers sessions in this process, so ledger rows carry
//! `user_id = None`. Deployments that know the user behind a session build
//! state with [`AppState::new`] and their own [`SessionDirectory`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    AccessGrants, CallbackGuard, CsrfGuard, InMemoryRateLimitStore, RateLimiter, TokenError,
    TokenSigner,
};
use crate::config::AppConfig;
use crate::payments::{OrchestratorConfig, PaymentOrchestrator};
use crate::providers::{DarajaClient, DarajaConfig, PaymentGateway};
use crate::storage::{
    AuditSink, InMemorySessionDirectory, JsonlAuditLog, LedgerError, PaymentLedger, RedbLedger,
    SessionDirectory, StoragePaths,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open payment ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to set up token signing: {0}")]
    Signer(#[from] TokenError),
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub csrf: CsrfGuard,
    pub access: AccessGrants,
    pub rate_limiter: RateLimiter,
    pub callback_guard: CallbackGuard,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Assemble state from already-built collaborators.
    pub fn new(
        config: AppConfig,
        ledger: Arc<dyn PaymentLedger>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        audit: Arc<dyn AuditSink>,
        sessions: Arc<dyn SessionDirectory>,
        signer: TokenSigner,
    ) -> Self {
        let signer = Arc::new(signer);
        let orchestrator = PaymentOrchestrator::new(
            ledger,
            gateway,
            audit.clone(),
            sessions,
            OrchestratorConfig {
                amount: config.payment_amount,
                description: config.payment_description.clone(),
                idempotency_window: config.idempotency_window,
            },
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            csrf: CsrfGuard::new(signer.clone(), config.cookie_secure),
            access: AccessGrants::new(signer, config.cookie_secure),
            rate_limiter: RateLimiter::new(
                Arc::new(InMemoryRateLimitStore::default()),
                config.rate_limit_max_attempts,
                config.rate_limit_window,
            ),
            callback_guard: CallbackGuard::new(
                config.callback_token.clone(),
                config.callback_allowed_ips.clone(),
            ),
            audit,
        }
    }

    /// Open storage under `DATA_DIR` and connect the gateway from the
    /// environment. A missing gateway configuration is not fatal.
    pub fn initialize(config: AppConfig) -> Result<Self, StartupError> {
        let paths = StoragePaths::new(&config.data_dir);
        let ledger = RedbLedger::open(&paths.ledger_db())?;
        info!(path = %paths.ledger_db().display(), "payment ledger opened");

        let gateway: Option<Arc<dyn PaymentGateway>> = if DarajaConfig::is_configured() {
            match DarajaClient::from_env() {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %e, "payment gateway misconfigured; initiation disabled");
                    None
                }
            }
        } else {
            warn!("payment gateway credentials not set; initiation disabled");
            None
        };

        let signer = match &config.signing_secret {
            Some(secret) => TokenSigner::new(secret.as_bytes())?,
            None => {
                warn!("ACCESS_SIGNING_SECRET not set; using a random per-process key");
                TokenSigner::random()?
            }
        };

        let state = Self::new(
            config,
            Arc::new(ledger),
            gateway,
            Arc::new(JsonlAuditLog::new(paths)),
            Arc::new(InMemorySessionDirectory::new()),
            signer,
        );
        if !state.callback_guard.is_enforcing() {
            warn!(
                "gateway callbacks are not authenticated; \
                 set MPESA_CALLBACK_TOKEN or MPESA_CALLBACK_ALLOWED_IPS"
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "3f4d6542-b8ce-4226-93d3-80d6f14d6db2";

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            data_dir: dir.path().display().to_string(),
            signing_secret: Some("state-test-secret".to_string()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn initialized_state_has_no_session_owners() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::initialize(config(&dir)).unwrap();
        assert_eq!(state.orchestrator.owner_of(SESSION), None);
    }

    #[test]
    fn injected_directory_attributes_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = InMemorySessionDirectory::new();
        sessions.register(SESSION, "user_42");
        let ledger = RedbLedger::open(&dir.path().join("ledger.redb")).unwrap();

        let state = AppState::new(
            config(&dir),
            Arc::new(ledger),
            None,
            Arc::new(JsonlAuditLog::new(StoragePaths::new(dir.path()))),
            Arc::new(sessions),
            TokenSigner::new(b"state-test-secret").unwrap(),
        );
        assert_eq!(
            state.orchestrator.owner_of(SESSION).as_deref(),
            Some("user_42")
        );
    }
}
