// services/notification.rs
use reqwest::Client;

use crate::config::SmsConfig;
use crate::errors::{AppError, Result};

/// Best-effort SMS dispatch for payment confirmations. A send failure is the
/// caller's to log and ignore; it must never fail the payment flow.
#[derive(Clone)]
pub struct NotificationService {
    config: SmsConfig,
    client: Client,
}

impl NotificationService {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub async fn notify(&self, phone: &str, message: &str) -> Result<()> {
        // Africa's Talking messaging API
        let url = "https://api.africastalking.com/version1/messaging";

        let response = self
            .client
            .post(url)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.config.username.as_str()),
                ("to", phone),
                ("message", message),
                ("from", self.config.from.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::service_unavailable(format!("SMS API error: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::service_unavailable(format!(
                "SMS sending failed with status: {}",
                response.status()
            )))
        }
    }
}
