// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway webhook payload (STK callback) and its mapping to an outcome.
//!
//! ```json
//! { "Body": { "stkCallback": {
//!     "MerchantRequestID": "29115-34620561-1",
//!     "CheckoutRequestID": "ws_CO_191220191020363925",
//!     "ResultCode": 0,
//!     "ResultDesc": "The service request is processed successfully.",
//!     "CallbackMetadata": { "Item": [
//!         { "Name": "Amount", "Value": 50 },
//!         { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
//!         { "Name": "PhoneNumber", "Value": 254727921038 }
//!     ] }
//! } } }
//! ```
//!
//! Metadata items are looked up by name; the gateway does not guarantee order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::model::PaymentOutcome;

const RECEIPT_ITEM: &str = "MpesaReceiptNumber";
const PHONE_ITEM: &str = "PhoneNumber";
const ACCOUNT_REFERENCE_ITEM: &str = "AccountReference";

/// Result code the gateway uses for a processed charge.
pub const RESULT_CODE_SUCCESS: i64 = 0;

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
}

/// Acknowledgement body the gateway expects from the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: RESULT_CODE_SUCCESS,
            result_desc: "Accepted".to_string(),
        }
    }
}

impl StkCallback {
    /// Find a metadata value by name, rendered as a string.
    ///
    /// Numbers (the gateway sends phone numbers unquoted) are rendered in
    /// decimal; blank strings count as absent.
    pub fn metadata_value(&self, name: &str) -> Option<String> {
        let item = self
            .callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?;

        match item.value.as_ref()? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn receipt_code(&self) -> Option<String> {
        self.metadata_value(RECEIPT_ITEM)
    }

    pub fn confirming_phone(&self) -> Option<String> {
        self.metadata_value(PHONE_ITEM)
    }

    pub fn account_reference(&self) -> Option<String> {
        self.metadata_value(ACCOUNT_REFERENCE_ITEM)
    }

    /// Map the callback to a terminal outcome.
    ///
    /// Success requires both a zero result code and a receipt code; every
    /// other combination is a decline.
    pub fn outcome(&self) -> PaymentOutcome {
        match (self.result_code, self.receipt_code()) {
            (RESULT_CODE_SUCCESS, Some(receipt_code)) => PaymentOutcome::Paid {
                receipt_code,
                confirmed_phone: self.confirming_phone(),
                result_code: self.result_code,
                result_description: self.result_desc.clone(),
            },
            (RESULT_CODE_SUCCESS, None) => PaymentOutcome::Declined {
                result_code: self.result_code,
                result_description: "Gateway reported success without a receipt code".to_string(),
            },
            (code, _) => PaymentOutcome::Declined {
                result_code: code,
                result_description: self.result_desc.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> StkCallback {
        serde_json::from_value::<StkCallbackEnvelope>(value)
            .unwrap()
            .body
            .stk_callback
    }

    #[test]
    fn success_with_receipt_is_paid() {
        let callback = parse(json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "mr_1",
                "CheckoutRequestID": "ws_1",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "Amount", "Value": 50 },
                    { "Name": "MpesaReceiptNumber", "Value": "ABC123" },
                    { "Name": "Balance" },
                    { "Name": "PhoneNumber", "Value": 254727921038u64 }
                ] }
            } }
        }));

        assert_eq!(
            callback.outcome(),
            PaymentOutcome::Paid {
                receipt_code: "ABC123".to_string(),
                confirmed_phone: Some("254727921038".to_string()),
                result_code: 0,
                result_description: "The service request is processed successfully.".to_string(),
            }
        );
    }

    #[test]
    fn metadata_lookup_ignores_item_order() {
        let callback = parse(json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_1",
                "ResultCode": 0,
                "ResultDesc": "ok",
                "CallbackMetadata": { "Item": [
                    { "Name": "PhoneNumber", "Value": "254727921038" },
                    { "Name": "AccountReference", "Value": "DOC3F4D6542B" },
                    { "Name": "MpesaReceiptNumber", "Value": "XYZ789" }
                ] }
            } }
        }));

        assert_eq!(callback.receipt_code().as_deref(), Some("XYZ789"));
        assert_eq!(callback.confirming_phone().as_deref(), Some("254727921038"));
        assert_eq!(callback.account_reference().as_deref(), Some("DOC3F4D6542B"));
    }

    #[test]
    fn success_code_without_receipt_is_declined() {
        let callback = parse(json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_1",
                "ResultCode": 0,
                "ResultDesc": "ok",
                "CallbackMetadata": { "Item": [
                    { "Name": "PhoneNumber", "Value": 254727921038u64 }
                ] }
            } }
        }));

        assert!(matches!(
            callback.outcome(),
            PaymentOutcome::Declined { result_code: 0, .. }
        ));
    }

    #[test]
    fn blank_receipt_counts_as_missing() {
        let callback = parse(json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_1",
                "ResultCode": 0,
                "CallbackMetadata": { "Item": [
                    { "Name": "MpesaReceiptNumber", "Value": "  " }
                ] }
            } }
        }));

        assert!(callback.receipt_code().is_none());
        assert!(matches!(callback.outcome(), PaymentOutcome::Declined { .. }));
    }

    #[test]
    fn cancelled_by_user_is_declined() {
        let callback = parse(json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "mr_1",
                "CheckoutRequestID": "ws_1",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            } }
        }));

        assert_eq!(
            callback.outcome(),
            PaymentOutcome::Declined {
                result_code: 1032,
                result_description: "Request cancelled by user".to_string(),
            }
        );
    }

    #[test]
    fn ack_matches_gateway_contract() {
        let body = serde_json::to_value(CallbackAck::accepted()).unwrap();
        assert_eq!(body, json!({ "ResultCode": 0, "ResultDesc": "Accepted" }));
    }
}
