use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(payments_health))
        // STK push lifecycle
        .route("/initiate", post(payment_handlers::initiate_payment))
        .route("/callback", post(payment_handlers::mpesa_callback))
        .route(
            "/status/:checkout_request_id",
            get(payment_handlers::get_payment_status),
        )
        // Audit/support
        .route(
            "/history/:order_id/:order_type",
            get(payment_handlers::get_payment_history),
        )
        .route("/stats", get(payment_handlers::get_payment_stats))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "status-poll", "history"]
    }))
}
