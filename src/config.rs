// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the [`AppConfig`] loaded once at
//! startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Ledger database and audit log root | `./data` |
//! | `MPESA_BASE_URL` | Gateway API base URL | `https://sandbox.safaricom.co.ke` |
//! | `MPESA_CONSUMER_KEY` | Gateway consumer key (Basic auth user) | Required for payments |
//! | `MPESA_CONSUMER_SECRET` | Gateway consumer secret | Required for payments |
//! | `MPESA_SHORTCODE` | Merchant short code | Required for payments |
//! | `MPESA_PASSKEY` | STK push passkey | Required for payments |
//! | `MPESA_CALLBACK_URL` | Public webhook URL | Required for payments |
//! | `MPESA_CALLBACK_TOKEN` | Shared secret expected as `?token=` on the webhook | Optional |
//! | `MPESA_CALLBACK_ALLOWED_IPS` | Comma-separated webhook source allowlist | Optional |
//! | `PAYMENT_AMOUNT` | Fixed fee in whole currency units | `50` |
//! | `PAYMENT_DESCRIPTION` | Description shown on the payment prompt | `Document unlock` |
//! | `ACCESS_SIGNING_SECRET` | HMAC key for access cookies and CSRF tokens | Random per process |
//! | `COOKIE_SECURE` | Add the `Secure` attribute to cookies | `true` |
//! | `RATE_LIMIT_MAX_ATTEMPTS` | Initiations allowed per client per window | `5` |
//! | `RATE_LIMIT_WINDOW_SECS` | Rate limit window length | `600` |
//! | `IDEMPOTENCY_WINDOW_SECS` | Window in which a pending attempt is reused | `120` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Root for `ledger.redb` and `audit/`.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "./data";

pub const CALLBACK_TOKEN_ENV: &str = "MPESA_CALLBACK_TOKEN";
pub const CALLBACK_ALLOWED_IPS_ENV: &str = "MPESA_CALLBACK_ALLOWED_IPS";

pub const PAYMENT_AMOUNT_ENV: &str = "PAYMENT_AMOUNT";
pub const DEFAULT_PAYMENT_AMOUNT: u64 = 50;
pub const PAYMENT_DESCRIPTION_ENV: &str = "PAYMENT_DESCRIPTION";
pub const DEFAULT_PAYMENT_DESCRIPTION: &str = "Document unlock";

/// Secret for the access cookie and CSRF token signatures.
///
/// When unset a random key is generated at startup, so cookies do not survive
/// a restart and cannot be shared between instances.
pub const ACCESS_SIGNING_SECRET_ENV: &str = "ACCESS_SIGNING_SECRET";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";

pub const RATE_LIMIT_MAX_ATTEMPTS_ENV: &str = "RATE_LIMIT_MAX_ATTEMPTS";
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;
pub const RATE_LIMIT_WINDOW_SECS_ENV: &str = "RATE_LIMIT_WINDOW_SECS";
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 600;

pub const IDEMPOTENCY_WINDOW_SECS_ENV: &str = "IDEMPOTENCY_WINDOW_SECS";
pub const DEFAULT_IDEMPOTENCY_WINDOW_SECS: u64 = 120;

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

// =============================================================================
// Env helpers
// =============================================================================

/// Read a variable, treating blank values as unset.
pub fn env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable the caller cannot work without.
pub fn env_required(name: &str) -> Option<String> {
    let value = env_optional(name);
    if value.is_none() {
        warn!(variable = name, "required environment variable is not set");
    }
    value
}

pub fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable, falling back to `default` (with a warning) when the
/// value does not parse.
pub fn env_parse_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env_optional(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "invalid value, using default");
            default
        }),
    }
}

pub fn env_flag(name: &str, default: bool) -> bool {
    match env_optional(name).map(|v| v.to_ascii_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!(variable = name, value = %v, "invalid boolean, using default");
            default
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Payment flow settings that do not belong to the gateway client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub payment_amount: u64,
    pub payment_description: String,
    pub signing_secret: Option<String>,
    pub cookie_secure: bool,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window: Duration,
    pub idempotency_window: Duration,
    pub callback_token: Option<String>,
    /// Empty means every source is allowed.
    pub callback_allowed_ips: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            payment_amount: DEFAULT_PAYMENT_AMOUNT,
            payment_description: DEFAULT_PAYMENT_DESCRIPTION.to_string(),
            signing_secret: None,
            cookie_secure: true,
            rate_limit_max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            idempotency_window: Duration::from_secs(DEFAULT_IDEMPOTENCY_WINDOW_SECS),
            callback_token: None,
            callback_allowed_ips: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or_default(HOST_ENV, &defaults.host),
            port: env_parse_or(PORT_ENV, defaults.port),
            data_dir: env_or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR),
            payment_amount: env_parse_or(PAYMENT_AMOUNT_ENV, DEFAULT_PAYMENT_AMOUNT),
            payment_description: env_or_default(
                PAYMENT_DESCRIPTION_ENV,
                DEFAULT_PAYMENT_DESCRIPTION,
            ),
            signing_secret: env_optional(ACCESS_SIGNING_SECRET_ENV),
            cookie_secure: env_flag(COOKIE_SECURE_ENV, true),
            rate_limit_max_attempts: env_parse_or(
                RATE_LIMIT_MAX_ATTEMPTS_ENV,
                DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            ),
            rate_limit_window: Duration::from_secs(env_parse_or(
                RATE_LIMIT_WINDOW_SECS_ENV,
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )),
            idempotency_window: Duration::from_secs(env_parse_or(
                IDEMPOTENCY_WINDOW_SECS_ENV,
                DEFAULT_IDEMPOTENCY_WINDOW_SECS,
            )),
            callback_token: env_optional(CALLBACK_TOKEN_ENV),
            callback_allowed_ips: env_optional(CALLBACK_ALLOWED_IPS_ENV)
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_is_split_and_trimmed() {
        assert_eq!(
            parse_list(" 196.201.214.200, 196.201.214.206 ,,"),
            vec!["196.201.214.200".to_string(), "196.201.214.206".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn invalid_numbers_fall_back_to_default() {
        // Unique names so parallel tests do not race on the environment.
        env::set_var("PAYWALL_TEST_BAD_NUMBER", "five");
        assert_eq!(env_parse_or("PAYWALL_TEST_BAD_NUMBER", 5u32), 5);
        env::set_var("PAYWALL_TEST_GOOD_NUMBER", " 7 ");
        assert_eq!(env_parse_or("PAYWALL_TEST_GOOD_NUMBER", 5u32), 7);
        assert_eq!(env_parse_or("PAYWALL_TEST_UNSET_NUMBER", 9u64), 9);
    }

    #[test]
    fn flags_accept_common_spellings() {
        env::set_var("PAYWALL_TEST_FLAG_OFF", "false");
        assert!(!env_flag("PAYWALL_TEST_FLAG_OFF", true));
        env::set_var("PAYWALL_TEST_FLAG_ON", "1");
        assert!(env_flag("PAYWALL_TEST_FLAG_ON", false));
        env::set_var("PAYWALL_TEST_FLAG_JUNK", "maybe");
        assert!(env_flag("PAYWALL_TEST_FLAG_JUNK", true));
    }

    #[test]
    fn blank_values_count_as_unset() {
        env::set_var("PAYWALL_TEST_BLANK", "   ");
        assert_eq!(env_optional("PAYWALL_TEST_BLANK"), None);
        assert_eq!(env_or_default("PAYWALL_TEST_BLANK", "fallback"), "fallback");
    }
}
