// handlers/payment_handlers.rs
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::order::{OrderPaymentStatus, OrderPaymentUpdate};
use crate::models::payment_transaction::{
    NewPaymentTransaction, OrderKind, PaymentStatus, PaymentTransaction,
};
use crate::services::callback::{self, CallbackResult};
use crate::services::gateway::{
    normalize_phone_number, round_amount, PaymentGateway as _, StatusQueryOutcome,
};
use crate::services::ledger::{TerminalOutcome, TransitionResult};
use crate::services::reconciliation;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub order_id: Option<String>,
    pub order_type: Option<String>,
    #[validate(length(min = 9, message = "phoneNumber looks too short"))]
    pub phone_number: Option<String>,
    #[validate(range(min = 1.0, message = "amount must be at least 1"))]
    pub amount: Option<f64>,
    pub initiated_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusResponse {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub phone_number: String,
    pub result_desc: Option<String>,
    pub receipt_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistoryEntry {
    pub transaction_id: String,
    pub order_id: String,
    pub order_type: OrderKind,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub phone_number: String,
    pub result_desc: Option<String>,
    pub receipt_id: Option<String>,
    pub initiated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentTransaction> for TransactionStatusResponse {
    fn from(tx: PaymentTransaction) -> Self {
        TransactionStatusResponse {
            transaction_id: tx.id.map(|id| id.to_hex()).unwrap_or_default(),
            status: tx.status,
            amount: tx.amount,
            phone_number: tx.phone_number,
            result_desc: tx.result_desc,
            receipt_id: tx.receipt_number,
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}

impl From<PaymentTransaction> for TransactionHistoryEntry {
    fn from(tx: PaymentTransaction) -> Self {
        TransactionHistoryEntry {
            transaction_id: tx.id.map(|id| id.to_hex()).unwrap_or_default(),
            order_id: tx.order_id,
            order_type: tx.order_kind,
            checkout_request_id: tx.checkout_request_id,
            merchant_request_id: tx.merchant_request_id,
            status: tx.status,
            amount: tx.amount,
            phone_number: tx.phone_number,
            result_desc: tx.result_desc,
            receipt_id: tx.receipt_number,
            initiated_by: tx.initiated_by,
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    let order_id = required_field(&request.order_id, "orderId")?;
    let order_type = required_field(&request.order_type, "orderType")?;
    let phone_number = required_field(&request.phone_number, "phoneNumber")?;
    let amount = request
        .amount
        .ok_or_else(|| AppError::validation("amount is required"))?;

    let order_kind: OrderKind = order_type.parse()?;

    let order = state
        .orders
        .get_order_for_payment(&order_id, order_kind)
        .await?;
    let account_reference = order.tracking_reference.unwrap_or_else(|| order_id.clone());

    // Whole shillings from here on.
    let amount = round_amount(amount);

    let accepted = state
        .gateway
        .initiate_push_payment(
            &phone_number,
            amount,
            &account_reference,
            "ParcelLink delivery payment",
        )
        .await?;

    let transaction = state
        .ledger
        .create(NewPaymentTransaction {
            order_id: order_id.clone(),
            order_kind,
            phone_number: normalize_phone_number(&phone_number),
            amount,
            initiated_by: request.initiated_by.clone(),
            merchant_request_id: accepted.merchant_request_id.clone(),
            checkout_request_id: accepted.checkout_request_id.clone(),
        })
        .await?;

    // The prompt is already on the payer's phone; a failure to flag the order
    // as pending is logged, not surfaced.
    let pending_update = OrderPaymentUpdate {
        status: OrderPaymentStatus::Pending,
        receipt_number: None,
        checkout_request_id: Some(accepted.checkout_request_id.clone()),
    };
    if let Err(e) = state
        .orders
        .set_order_payment_status(&order_id, order_kind, pending_update)
        .await
    {
        warn!("Could not mark order {} as pending: {}", order_id, e);
    }

    Ok(Json(InitiatePaymentResponse {
        success: true,
        checkout_request_id: accepted.checkout_request_id,
        merchant_request_id: accepted.merchant_request_id,
        customer_message: accepted.customer_message,
        transaction_id: transaction.id.map(|id| id.to_hex()).unwrap_or_default(),
    }))
}

/// Provider acknowledgment body. Anything other than this makes the provider
/// retry the callback redundantly.
fn callback_ack(desc: &str) -> Value {
    json!({
        "ResultCode": 0,
        "ResultDesc": desc,
    })
}

/// Takes the raw body rather than a typed extractor: an unparseable payload
/// must still reach the log-and-acknowledge branch instead of a framework 400.
pub async fn mpesa_callback(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match callback::parse_callback(&body) {
        Ok(result) => {
            info!(
                "M-Pesa callback for {}: code {} ({})",
                result.checkout_request_id, result.result_code, result.result_desc
            );
            if let Err(e) = apply_callback(&state, &result).await {
                error!(
                    "Callback processing failed for {}: {}",
                    result.checkout_request_id, e
                );
            }
        }
        Err(e) => {
            // Acknowledge anyway and keep the raw payload for forensics.
            error!("Unparseable M-Pesa callback ({}); raw payload: {}", e, body);
        }
    }

    Json(callback_ack("Callback received successfully"))
}

async fn apply_callback(state: &AppState, result: &CallbackResult) -> Result<()> {
    let outcome = if result.success {
        let receipt = result
            .metadata
            .as_ref()
            .and_then(|m| m.receipt_number.clone());
        TerminalOutcome::completed(result.result_code, result.result_desc.clone(), receipt)
    } else {
        TerminalOutcome::failed(result.result_code, result.result_desc.clone())
    };

    let transition = state
        .ledger
        .transition_to_terminal(&result.checkout_request_id, outcome)
        .await?;

    finalize_transition(state, &transition).await;
    Ok(())
}

/// Side effects of a terminal transition: reconciliation and the confirmation
/// SMS. Runs only when this caller actually won the transition, so a replayed
/// callback or a racing poll cannot double-apply them.
async fn finalize_transition(state: &AppState, transition: &TransitionResult) {
    if !transition.transitioned {
        return;
    }
    let transaction = &transition.transaction;

    if let Err(e) = reconciliation::reconcile(&state.orders, transaction).await {
        // The transaction's terminal state stands regardless.
        error!(
            "Reconciliation failed for order {} ({}): {}",
            transaction.order_id, transaction.order_kind, e
        );
    }

    if transaction.status == PaymentStatus::Completed {
        if let Some(notifier) = &state.notifier {
            let message = format!(
                "Payment of KES {} for parcel {} received. Receipt: {}.",
                transaction.amount,
                transaction.order_id,
                transaction.receipt_number.as_deref().unwrap_or("-"),
            );
            if let Err(e) = notifier.notify(&transaction.phone_number, &message).await {
                warn!("Confirmation SMS failed: {}", e);
            }
        }
    }
}

pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<TransactionStatusResponse>> {
    let mut transaction = state.ledger.get(&checkout_request_id).await?;

    if transaction.status == PaymentStatus::Pending {
        // Opportunistic refresh. The provider frequently has no answer yet, so
        // an inconclusive or failed query returns the last known state.
        match state.gateway.query_status(&checkout_request_id).await {
            Ok(StatusQueryOutcome::Settled {
                result_code,
                result_desc,
            }) => {
                let outcome = if result_code == 0 {
                    TerminalOutcome::completed(result_code, result_desc, None)
                } else {
                    TerminalOutcome::failed(result_code, result_desc)
                };
                let transition = state
                    .ledger
                    .transition_to_terminal(&checkout_request_id, outcome)
                    .await?;
                finalize_transition(&state, &transition).await;
                transaction = transition.transaction;
            }
            Ok(StatusQueryOutcome::Processing) => {
                info!("Transaction {} still processing", checkout_request_id);
            }
            Err(e) => {
                warn!(
                    "Status query for {} failed; returning last known state: {}",
                    checkout_request_id, e
                );
            }
        }
    }

    Ok(Json(transaction.into()))
}

pub async fn get_payment_history(
    State(state): State<AppState>,
    Path((order_id, order_type)): Path<(String, String)>,
) -> Result<Json<Vec<TransactionHistoryEntry>>> {
    let order_kind: OrderKind = order_type.parse()?;

    let transactions = state.ledger.history_for(&order_id, order_kind).await?;

    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

pub async fn get_payment_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.ledger.stats().await?;
    Ok(Json(json!(stats)))
}

fn required_field(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::validation(format!("{} is required", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    fn sample_transaction() -> PaymentTransaction {
        PaymentTransaction {
            id: Some(ObjectId::new()),
            order_id: "P100".to_string(),
            order_kind: OrderKind::Regular,
            phone_number: "254712345678".to_string(),
            amount: 850,
            initiated_by: Some("customer-42".to_string()),
            merchant_request_id: "29115-34620561-1".to_string(),
            checkout_request_id: "ws_CO_191220191020363925".to_string(),
            status: PaymentStatus::Completed,
            result_code: Some(0),
            result_desc: Some("The service request is processed successfully.".to_string()),
            receipt_number: Some("ABC123".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn callback_ack_is_provider_shaped() {
        let ack = callback_ack("Callback received successfully");
        assert_eq!(ack["ResultCode"], 0);
        assert!(ack["ResultDesc"].is_string());
    }

    #[test]
    fn status_response_uses_camel_case_contract() {
        let response: TransactionStatusResponse = sample_transaction().into();
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["status"], "completed");
        assert_eq!(value["amount"], 850);
        assert_eq!(value["phoneNumber"], "254712345678");
        assert_eq!(value["receiptId"], "ABC123");
        assert!(value["transactionId"].is_string());
        assert!(value.get("completedAt").is_some());
    }

    #[test]
    fn history_entry_carries_order_reference() {
        let entry: TransactionHistoryEntry = sample_transaction().into();
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["orderId"], "P100");
        assert_eq!(value["orderType"], "regular");
        assert_eq!(value["checkoutRequestId"], "ws_CO_191220191020363925");
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(required_field(&None, "orderId").is_err());
        assert!(required_field(&Some("  ".to_string()), "orderId").is_err());
        assert_eq!(
            required_field(&Some("P100".to_string()), "orderId").unwrap(),
            "P100"
        );
    }
}
