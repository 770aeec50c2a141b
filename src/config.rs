// config.rs
use std::env;

use dotenvy::dotenv;
use tracing::info;

use crate::errors::{AppError, Result};

/// Which gateway implementation the process runs with. Selected once at
/// startup; there is no runtime fallback between modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Sandbox,
    Production,
    Disabled,
}

impl GatewayMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sandbox" => Ok(GatewayMode::Sandbox),
            "production" => Ok(GatewayMode::Production),
            "disabled" => Ok(GatewayMode::Disabled),
            other => Err(AppError::Configuration(format!(
                "MPESA_MODE must be sandbox, production or disabled (got '{}')",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Sandbox => "sandbox",
            GatewayMode::Production => "production",
            GatewayMode::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: String,
    pub username: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_mode: GatewayMode,
    pub database_url: String,
    pub port: u16,
    pub host: String,
    pub sms: Option<SmsConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mpesa_mode = GatewayMode::parse(
            &env::var("MPESA_MODE").unwrap_or_else(|_| "sandbox".to_string()),
        )?;

        // Credentials are mandatory for a live gateway but irrelevant when the
        // gateway is explicitly disabled.
        let require = |name: &str| -> Result<String> {
            env::var(name).map_err(|_| AppError::Configuration(format!("{} must be set", name)))
        };
        let (consumer_key, consumer_secret, short_code, passkey, callback_url) =
            if mpesa_mode == GatewayMode::Disabled {
                (
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                )
            } else {
                (
                    require("MPESA_CONSUMER_KEY")?,
                    require("MPESA_CONSUMER_SECRET")?,
                    require("MPESA_SHORT_CODE")?,
                    require("MPESA_PASSKEY")?,
                    require("MPESA_CALLBACK_URL")?,
                )
            };

        // SMS confirmations are optional; without an API key they are simply off.
        let sms = env::var("SMS_API_KEY").ok().map(|api_key| SmsConfig {
            api_key,
            username: env::var("SMS_USERNAME").unwrap_or_else(|_| "sandbox".to_string()),
            from: env::var("SMS_FROM").unwrap_or_else(|_| "ParcelLink".to_string()),
        });

        let config = AppConfig {
            mpesa_consumer_key: consumer_key,
            mpesa_consumer_secret: consumer_secret,
            mpesa_short_code: short_code,
            mpesa_passkey: passkey,
            mpesa_callback_url: callback_url,
            mpesa_mode,
            database_url: require("DATABASE_URL")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| AppError::Configuration("PORT must be a number".to_string()))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            sms,
        };

        // Secrets never hit the logs; only their presence does.
        info!(
            "M-Pesa config loaded: mode={}, short_code={}, consumer_key_set={}, sms_enabled={}",
            config.mpesa_mode.as_str(),
            config.mpesa_short_code,
            !config.mpesa_consumer_key.is_empty(),
            config.sms.is_some(),
        );

        Ok(config)
    }

    pub fn mpesa_urls(&self) -> (String, String, String) {
        let base_url = if self.mpesa_mode == GatewayMode::Production {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);
        let query_url = format!("{}/mpesa/stkpushquery/v1/query", base_url);

        (auth_url, stk_url, query_url)
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_mode == GatewayMode::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_mode_parses_known_values() {
        assert_eq!(GatewayMode::parse("sandbox").unwrap(), GatewayMode::Sandbox);
        assert_eq!(GatewayMode::parse("production").unwrap(), GatewayMode::Production);
        assert_eq!(GatewayMode::parse("disabled").unwrap(), GatewayMode::Disabled);
        assert!(GatewayMode::parse("staging").is_err());
    }
}
