// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scripted in-process gateway for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChargeAcknowledgement, ChargeRequest, GatewayError, PaymentGateway};

/// Pops one scripted result per call; once the script is empty every call
/// is acknowledged with checkout id `ws_<n>`.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ChargeAcknowledgement, GatewayError>>>,
    calls: AtomicU32,
    phones: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn failing_with(error: GatewayError) -> Self {
        let gateway = Self::default();
        gateway.script.lock().unwrap().push_back(Err(error));
        gateway
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payer phones of every call, in order.
    pub fn phones(&self) -> Vec<String> {
        self.phones.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_charge(
        &self,
        request: ChargeRequest<'_>,
    ) -> Result<ChargeAcknowledgement, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.phones.lock().unwrap().push(request.phone.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ChargeAcknowledgement {
                checkout_request_id: format!("ws_{n}"),
                merchant_request_id: format!("mr_{n}"),
                customer_message: Some("Success. Request accepted for processing".to_string()),
            })
        })
    }
}
