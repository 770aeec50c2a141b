use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, GatewayMode};
use database::connection::get_db_client;
use services::gateway::{DarajaGateway, DisabledGateway, PaymentGateway};
use services::notification::NotificationService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db = get_db_client(&config.database_url).await;
    let app_state = initialize_app_state(db, &config).await;

    let app = build_router(app_state).await;
    start_server(app, &config).await;
}

async fn initialize_app_state(db: mongodb::Database, config: &AppConfig) -> AppState {
    // Gateway selection is explicit and happens exactly once. Bad credentials
    // show up as request-time errors, not as a silent switch to the disabled
    // gateway.
    let gateway: Arc<dyn PaymentGateway> = match config.mpesa_mode {
        GatewayMode::Disabled => {
            tracing::warn!("M-Pesa gateway explicitly disabled (MPESA_MODE=disabled)");
            Arc::new(DisabledGateway)
        }
        _ => {
            let gateway = DarajaGateway::new(config.clone());

            // Startup probe so credential problems surface in the boot log.
            match gateway.get_access_token().await {
                Ok(_) => tracing::info!("✅ M-Pesa access token obtained"),
                Err(e) => tracing::warn!(
                    "M-Pesa token probe failed ({}); initiations will keep retrying the provider",
                    e
                ),
            }

            Arc::new(gateway)
        }
    };

    let mut app_state = AppState::new(db, gateway);

    if let Err(e) = app_state.ledger.ensure_indexes().await {
        tracing::warn!("Could not ensure ledger indexes: {}", e);
    }

    if let Some(sms) = &config.sms {
        tracing::info!("✅ SMS confirmations enabled (from: {})", sms.from);
        app_state = app_state.with_notifier(Arc::new(NotificationService::new(sms.clone())));
    }

    app_state
}

async fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("HOST/PORT must form a valid socket address");

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            axum::serve(listener, app).await.unwrap();
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "📦 ParcelLink Payments API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "gateway_mode": state.gateway.mode(),
        "sms": state.notifier.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
