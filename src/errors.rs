// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("M-Pesa authentication failed")]
    Authentication,

    #[error("M-Pesa gateway error: {0}")]
    Gateway(String),

    #[error("M-Pesa gateway timed out")]
    GatewayTimeout,

    #[error("Malformed callback payload: {0}")]
    CallbackParse(String),

    #[error("Duplicate checkout request id: {0}")]
    DuplicateCheckoutId(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            // The initiation contract is a plain 500 with a message on any
            // provider-side failure; the user resubmits with a fresh checkout id.
            AppError::Authentication => (StatusCode::INTERNAL_SERVER_ERROR, "Payment service authentication failed".to_string()),
            AppError::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Payment gateway error".to_string()),
            AppError::GatewayTimeout => (StatusCode::INTERNAL_SERVER_ERROR, "Payment gateway timed out".to_string()),
            AppError::CallbackParse(_) => (StatusCode::BAD_REQUEST, "Malformed callback payload".to_string()),
            AppError::DuplicateCheckoutId(_) => (StatusCode::CONFLICT, "Duplicate checkout request".to_string()),
            AppError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            AppError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "Order not found".to_string()),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".to_string()),
            AppError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::CallbackParse(format!("JSON parsing error: {}", err))
    }
}

// Helper conversion functions
impl AppError {
    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::Gateway(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn callback_parse(msg: impl Into<String>) -> Self {
        AppError::CallbackParse(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        AppError::ServiceUnavailable(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_carry_the_provider_message() {
        let err = AppError::gateway("Invalid Access Token");
        assert_eq!(err.to_string(), "M-Pesa gateway error: Invalid Access Token");
    }

    #[test]
    fn timeout_is_distinct_from_rejection() {
        assert_ne!(
            AppError::GatewayTimeout.to_string(),
            AppError::gateway("rejected").to_string()
        );
    }
}
