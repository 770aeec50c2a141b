// services/callback.rs
//
// Turns the provider's asynchronous result notification into a structured
// outcome. Delivery is at-least-once, so everything downstream of a parsed
// callback must tolerate repeats.
use serde::Deserialize;

use crate::errors::{AppError, Result};
use crate::services::gateway::round_amount;

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadataItems>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadataItems {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    // The Balance item sometimes arrives with no Value at all.
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// Metadata the provider attaches to a successful payment. The items arrive as
/// a name/value list in no guaranteed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentMetadata {
    pub amount: Option<i64>,
    pub receipt_number: Option<String>,
    pub balance: Option<f64>,
    pub transaction_date: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i32,
    pub result_desc: String,
    pub success: bool,
    pub metadata: Option<PaymentMetadata>,
}

/// Parses a raw callback body. Any shape failure is a `CallbackParse` error;
/// the HTTP handler still acknowledges those (log-and-acknowledge), it just
/// cannot act on them.
pub fn parse_callback(raw: &str) -> Result<CallbackResult> {
    let envelope: CallbackEnvelope = serde_json::from_str(raw)
        .map_err(|e| AppError::callback_parse(e.to_string()))?;

    let callback = envelope.body.stk_callback;
    let success = callback.result_code == 0;

    let metadata = callback
        .callback_metadata
        .map(|m| extract_metadata(&m.items));

    Ok(CallbackResult {
        merchant_request_id: callback.merchant_request_id,
        checkout_request_id: callback.checkout_request_id,
        result_code: callback.result_code,
        result_desc: callback.result_desc,
        success,
        metadata,
    })
}

fn extract_metadata(items: &[MetadataItem]) -> PaymentMetadata {
    let mut metadata = PaymentMetadata::default();

    for item in items {
        let Some(value) = &item.value else { continue };
        match item.name.as_str() {
            "Amount" => {
                metadata.amount = value.as_f64().map(round_amount);
            }
            "MpesaReceiptNumber" => {
                metadata.receipt_number = value.as_str().map(|s| s.to_string());
            }
            "Balance" => {
                metadata.balance = value.as_f64();
            }
            "TransactionDate" => {
                // Arrives as a numeric YYYYMMDDHHMMSS stamp.
                metadata.transaction_date = match value {
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    serde_json::Value::String(s) => Some(s.clone()),
                    _ => None,
                };
            }
            "PhoneNumber" => {
                metadata.phone_number = match value {
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    serde_json::Value::String(s) => Some(s.clone()),
                    _ => None,
                };
            }
            _ => {}
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_payload() -> String {
        // Items deliberately out of the usual order.
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "PhoneNumber", "Value": 254712345678u64},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20191219102115u64},
                            {"Name": "Balance"},
                            {"Name": "Amount", "Value": 850.00}
                        ]
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_successful_callback_with_unordered_metadata() {
        let result = parse_callback(&success_payload()).unwrap();

        assert!(result.success);
        assert_eq!(result.result_code, 0);
        assert_eq!(result.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(result.merchant_request_id, "29115-34620561-1");

        let metadata = result.metadata.unwrap();
        assert_eq!(metadata.amount, Some(850));
        assert_eq!(metadata.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(metadata.phone_number.as_deref(), Some("254712345678"));
        assert_eq!(metadata.transaction_date.as_deref(), Some("20191219102115"));
        assert_eq!(metadata.balance, None);
    }

    #[test]
    fn parses_failed_callback_without_metadata() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        })
        .to_string();

        let result = parse_callback(&payload).unwrap();
        assert!(!result.success);
        assert_eq!(result.result_code, 1032);
        assert_eq!(result.result_desc, "Request cancelled by user");
        assert!(result.metadata.is_none());
    }

    #[test]
    fn malformed_payloads_are_parse_errors_not_panics() {
        for raw in ["", "not json", "{}", r#"{"Body": {}}"#, r#"{"Body": {"stkCallback": {}}}"#] {
            let err = parse_callback(raw).unwrap_err();
            assert!(matches!(err, AppError::CallbackParse(_)), "input: {raw:?}");
        }
    }

    #[test]
    fn repeated_parsing_is_deterministic() {
        let first = parse_callback(&success_payload()).unwrap();
        let second = parse_callback(&success_payload()).unwrap();
        assert_eq!(first.metadata, second.metadata);
        assert_eq!(first.result_code, second.result_code);
    }
}
