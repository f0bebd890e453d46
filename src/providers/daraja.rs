// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! M-Pesa Daraja STK push integration.
//!
//! Two sequential calls per charge:
//!
//! 1. `GET /oauth/v1/generate` with HTTP Basic auth (consumer key/secret)
//!    returns a short-lived bearer token. Cached until shortly before expiry.
//! 2. `POST /mpesa/stkpush/v1/processrequest` with the bearer token sends the
//!    payment prompt to the payer's phone.
//!
//! Both calls get one retry. The charge is only retried when the request
//! never reached the gateway; a non-2xx answer or a gateway error code is
//! final, since a retry could prompt the customer twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::retry::{retry, RetryPolicy};
use super::{ChargeAcknowledgement, ChargeRequest, GatewayError, PaymentGateway};
use crate::config::{env_optional, env_or_default, env_required, CALLBACK_TOKEN_ENV};

pub const DEFAULT_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const TOKEN_PATH: &str = "/oauth/v1/generate";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Gateway clock is East Africa Time (UTC+3); the password timestamp must
/// use it.
const GATEWAY_UTC_OFFSET_SECS: i32 = 3 * 3600;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Per-call timeout, well below the client's confirmation budget.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Refresh cached tokens this long before the gateway expires them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3599);

#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    /// Public webhook URL, callback token already appended.
    pub callback_url: String,
}

impl DarajaConfig {
    pub fn is_configured() -> bool {
        [
            "MPESA_CONSUMER_KEY",
            "MPESA_CONSUMER_SECRET",
            "MPESA_SHORTCODE",
            "MPESA_PASSKEY",
            "MPESA_CALLBACK_URL",
        ]
        .iter()
        .all(|name| env_optional(name).is_some())
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        let missing = |name: &str| GatewayError::MissingConfig(name.to_string());

        let callback_url =
            env_required("MPESA_CALLBACK_URL").ok_or_else(|| missing("MPESA_CALLBACK_URL"))?;
        let callback_url =
            with_callback_token(&callback_url, env_optional(CALLBACK_TOKEN_ENV).as_deref())?;

        Ok(Self {
            base_url: env_or_default("MPESA_BASE_URL", DEFAULT_BASE_URL),
            consumer_key: env_required("MPESA_CONSUMER_KEY")
                .ok_or_else(|| missing("MPESA_CONSUMER_KEY"))?,
            consumer_secret: env_required("MPESA_CONSUMER_SECRET")
                .ok_or_else(|| missing("MPESA_CONSUMER_SECRET"))?,
            shortcode: env_required("MPESA_SHORTCODE").ok_or_else(|| missing("MPESA_SHORTCODE"))?,
            passkey: env_required("MPESA_PASSKEY").ok_or_else(|| missing("MPESA_PASSKEY"))?,
            callback_url,
        })
    }
}

/// Append the shared webhook secret as a `token` query parameter.
pub fn with_callback_token(
    callback_url: &str,
    token: Option<&str>,
) -> Result<String, GatewayError> {
    let mut url = url::Url::parse(callback_url).map_err(|e| {
        GatewayError::MissingConfig(format!("MPESA_CALLBACK_URL is not a valid URL: {e}"))
    })?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url.to_string())
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds; the gateway sends it as a string.
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[derive(Clone)]
pub struct DarajaClient {
    config: DarajaConfig,
    http: Client,
    retry_policy: RetryPolicy,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl DarajaClient {
    pub fn new(config: DarajaConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            retry_policy: RetryPolicy::once(RETRY_BACKOFF),
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(DarajaConfig::from_env()?)
    }

    /// Override the retry policy (tests use a zero backoff).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.expires_at {
                    return Ok(token.value.clone());
                }
            }
        }

        let fresh = retry(self.retry_policy, "access_token", |_| true, || {
            self.fetch_token()
        })
        .await?;
        let value = fresh.value.clone();
        *self.token.write().await = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, GatewayError> {
        let response = self
            .http
            .get(self.url(TOKEN_PATH))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("invalid token response: {e}")))?;

        if token.access_token.trim().is_empty() {
            return Err(GatewayError::Auth(
                "token response did not include access_token".to_string(),
            ));
        }

        let lifetime = token_lifetime(token.expires_in.as_ref());
        debug!(lifetime_secs = lifetime.as_secs(), "gateway access token acquired");

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        })
    }

    async fn submit_charge(
        &self,
        token: &str,
        body: &StkPushRequest<'_>,
    ) -> Result<ChargeAcknowledgement, GatewayError> {
        let response = self
            .http
            .post(self.url(STK_PUSH_PATH))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("POST {STK_PUSH_PATH} failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<StkPushResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            return Err(match parsed {
                Some(StkPushResponse {
                    error_code: Some(code),
                    error_message,
                    ..
                }) => GatewayError::Rejected {
                    code,
                    description: error_message.unwrap_or_else(|| status.to_string()),
                },
                _ => GatewayError::Request(format!(
                    "POST {STK_PUSH_PATH} returned {status}: {text}"
                )),
            });
        }

        let parsed = parsed.ok_or_else(|| {
            GatewayError::InvalidResponse(format!("POST {STK_PUSH_PATH} invalid JSON: {text}"))
        })?;
        acknowledgement_from(parsed)
    }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
    async fn request_charge(
        &self,
        request: ChargeRequest<'_>,
    ) -> Result<ChargeAcknowledgement, GatewayError> {
        let token = self.access_token().await?;

        let timestamp = gateway_timestamp(Utc::now());
        let body = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount: request.amount,
            party_a: request.phone,
            party_b: &self.config.shortcode,
            phone_number: request.phone,
            call_back_url: &self.config.callback_url,
            account_reference: request.account_reference,
            transaction_desc: request.description,
        };

        let acknowledgement = retry(
            self.retry_policy,
            "stk_push",
            |e| matches!(e, GatewayError::Transport(_)),
            || self.submit_charge(&token, &body),
        )
        .await?;

        info!(
            checkout_id = %acknowledgement.checkout_request_id,
            account_reference = %request.account_reference,
            "charge prompt accepted by gateway"
        );
        Ok(acknowledgement)
    }
}

fn acknowledgement_from(response: StkPushResponse) -> Result<ChargeAcknowledgement, GatewayError> {
    if let Some(code) = response.error_code {
        return Err(GatewayError::Rejected {
            code,
            description: response.error_message.unwrap_or_default(),
        });
    }

    let response_code = response.response_code.unwrap_or_default();
    if response_code.trim() != "0" {
        return Err(GatewayError::Rejected {
            code: response_code,
            description: response.response_description.unwrap_or_default(),
        });
    }

    let checkout_request_id = response
        .checkout_request_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidResponse("missing CheckoutRequestID".to_string()))?;

    Ok(ChargeAcknowledgement {
        checkout_request_id,
        merchant_request_id: response.merchant_request_id.unwrap_or_default(),
        customer_message: response.customer_message,
    })
}

/// `YYYYMMDDHHMMSS` in gateway local time.
pub fn gateway_timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).format(TIMESTAMP_FORMAT).to_string(),
        None => now.format(TIMESTAMP_FORMAT).to_string(),
    }
}

/// Base64 of `shortcode || passkey || timestamp`.
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    Base64::encode_string(format!("{shortcode}{passkey}{timestamp}").as_bytes())
}

fn token_lifetime(expires_in: Option<&Value>) -> Duration {
    let secs = match expires_in {
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    secs.map(Duration::from_secs).unwrap_or(DEFAULT_TOKEN_LIFETIME)
}
