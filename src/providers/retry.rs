// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded retry with fixed backoff for outbound gateway calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How many times to call an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, first one included. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause before each retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// One call plus exactly one retry.
    pub const fn once(backoff: Duration) -> Self {
        Self {
            max_attempts: 2,
            backoff,
        }
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// is exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && is_retryable(&error) => {
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    error = %error,
                    "gateway call failed, retrying"
                );
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
