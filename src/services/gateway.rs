// services/gateway.rs
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Bounded timeout for every provider round-trip, separate from whatever the
/// inbound HTTP server allows. Daraja regularly takes several seconds.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    // Present once the provider has an outcome; absent while processing.
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
}

/// What the push-payment endpoint accepted. The outcome itself arrives later
/// via callback or a status query.
#[derive(Debug, Clone)]
pub struct PushPaymentAccepted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

/// Answer to a status query. `Processing` (and transport errors, per the
/// callers) mean "no news yet", never a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQueryOutcome {
    Settled { result_code: i32, result_desc: String },
    Processing,
}

/// Outbound side of the payment flow. Selected once at startup; handlers only
/// ever see the trait object.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_push_payment(
        &self,
        phone_number: &str,
        amount: i64,
        account_reference: &str,
        description: &str,
    ) -> Result<PushPaymentAccepted>;

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusQueryOutcome>;

    fn mode(&self) -> &'static str;
}

/// Normalizes user-entered phone numbers to the `2547XXXXXXXX` wire format.
/// Total and deterministic: garbage in produces (deterministic) garbage out,
/// and plausibility checks stay with the caller.
pub fn normalize_phone_number(input: &str) -> String {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '+'))
        .collect();

    if let Some(rest) = digits.strip_prefix('0') {
        return format!("254{}", rest);
    }
    if digits.starts_with("254") {
        return digits;
    }
    format!("254{}", digits)
}

/// The provider takes whole shillings only.
pub fn round_amount(amount: f64) -> i64 {
    amount.round() as i64
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::GatewayTimeout
    } else {
        AppError::gateway(format!("request failed: {}", err))
    }
}

/// Live client for Safaricom's Daraja API (sandbox or production base URL,
/// per config).
pub struct DarajaGateway {
    config: AppConfig,
    client: Client,
    cached_token: RwLock<Option<(String, chrono::DateTime<Utc>)>>,
}

impl DarajaGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        DarajaGateway {
            config,
            client,
            cached_token: RwLock::new(None),
        }
    }

    fn generate_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
        base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
    }

    fn password_and_timestamp(&self) -> (String, String) {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = Self::generate_password(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            &timestamp,
        );
        (password, timestamp)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let encoded_auth = base64.encode(format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        ));

        let (auth_url, _, _) = self.config.mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            // Status only; the basic-auth header must never reach the logs.
            error!("M-Pesa auth failed with status {}", response.status());
            return Err(AppError::Authentication);
        }

        let auth_response: AuthResponse =
            response.json().await.map_err(|_| AppError::Authentication)?;

        let ttl = auth_response
            .expires_in
            .parse::<i64>()
            .unwrap_or(3600);

        {
            let expiry_time = Utc::now() + chrono::Duration::seconds(ttl);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn initiate_push_payment(
        &self,
        phone_number: &str,
        amount: i64,
        account_reference: &str,
        description: &str,
    ) -> Result<PushPaymentAccepted> {
        if amount <= 0 {
            return Err(AppError::validation("Amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = normalize_phone_number(phone_number);
        let (password, timestamp) = self.password_and_timestamp();

        info!("STK push for {} - KSh {}", formatted_phone, amount);

        let (_, stk_url, _) = self.config.mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: description.to_string(),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push rejected: {} - {}", status, body);
            return Err(AppError::gateway(provider_error_message(&body, status)));
        }

        let stk_response: StkPushResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("unreadable STK push response: {}", e)))?;

        info!("STK push accepted: {}", stk_response.checkout_request_id);

        Ok(PushPaymentAccepted {
            merchant_request_id: stk_response.merchant_request_id,
            checkout_request_id: stk_response.checkout_request_id,
            customer_message: stk_response.customer_message,
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusQueryOutcome> {
        let access_token = self.get_access_token().await?;
        let (password, timestamp) = self.password_and_timestamp();

        let (_, _, query_url) = self.config.mpesa_urls();

        let query_request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(&query_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // "500.001.1001" is Daraja's way of saying the prompt is still on
            // the payer's phone.
            if body.contains("500.001.1001") {
                return Ok(StatusQueryOutcome::Processing);
            }
            warn!("STK query failed: {} - {}", status, body);
            return Err(AppError::gateway(provider_error_message(&body, status)));
        }

        let query_response: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("unreadable STK query response: {}", e)))?;

        match query_response
            .result_code
            .as_deref()
            .and_then(|c| c.parse::<i32>().ok())
        {
            Some(code) => Ok(StatusQueryOutcome::Settled {
                result_code: code,
                result_desc: query_response
                    .result_desc
                    .unwrap_or_else(|| query_response.response_description.clone()),
            }),
            None => Ok(StatusQueryOutcome::Processing),
        }
    }

    fn mode(&self) -> &'static str {
        self.config.mpesa_mode.as_str()
    }
}

fn provider_error_message(body: &str, status: reqwest::StatusCode) -> String {
    #[derive(Deserialize)]
    struct DarajaError {
        #[serde(rename = "errorMessage")]
        error_message: String,
    }

    match serde_json::from_str::<DarajaError>(body) {
        Ok(err) => err.error_message,
        Err(_) => format!("provider returned {}", status),
    }
}

/// Explicitly configured stand-in for environments without provider
/// credentials (MPESA_MODE=disabled). Every operation refuses cleanly instead
/// of pretending a prompt went out.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn initiate_push_payment(
        &self,
        _phone_number: &str,
        _amount: i64,
        _account_reference: &str,
        _description: &str,
    ) -> Result<PushPaymentAccepted> {
        Err(AppError::service_unavailable(
            "M-Pesa payments are disabled in this environment",
        ))
    }

    async fn query_status(&self, _checkout_request_id: &str) -> Result<StatusQueryOutcome> {
        Err(AppError::service_unavailable(
            "M-Pesa payments are disabled in this environment",
        ))
    }

    fn mode(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_yields_canonical_form() {
        for input in [
            "0712345678",
            "+254712345678",
            "254712345678",
            "0712 345 678",
        ] {
            assert_eq!(normalize_phone_number(input), "254712345678", "input: {input}");
        }
    }

    #[test]
    fn normalization_prepends_country_code_to_bare_numbers() {
        assert_eq!(normalize_phone_number("712345678"), "254712345678");
        assert_eq!(normalize_phone_number("712-345-678"), "254712345678");
    }

    #[test]
    fn normalization_is_total() {
        // Malformed input still yields a deterministic output; plausibility is
        // the caller's concern.
        assert_eq!(normalize_phone_number("abc"), "254abc");
        assert_eq!(normalize_phone_number(""), "254");
    }

    #[test]
    fn amounts_round_to_whole_shillings() {
        assert_eq!(round_amount(1500.60), 1501);
        assert_eq!(round_amount(1500.40), 1500);
        assert_eq!(round_amount(850.0), 850);
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let password = DarajaGateway::generate_password("174379", "secretkey", "20260806120000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(decoded, b"174379secretkey20260806120000");
    }

    #[tokio::test]
    async fn disabled_gateway_refuses_initiation() {
        let gateway = DisabledGateway;
        let err = gateway
            .initiate_push_payment("0712345678", 100, "PL-1", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(gateway.mode(), "disabled");
    }
}
