// services/reconciliation.rs
//
// Propagates a terminal payment outcome onto the owning order. The order-kind
// routing table picks a collection; the update itself is identical for every
// kind, and repeating it is a plain overwrite.
use chrono::Utc;
use mongodb::{
    bson::{doc, Document},
    Collection, Database,
};
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::order::{OrderPaymentStatus, OrderPaymentUpdate, OrderPaymentView};
use crate::models::payment_transaction::{OrderKind, PaymentStatus, PaymentTransaction};

#[derive(Clone)]
pub struct OrderStore {
    db: Database,
}

impl OrderStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, kind: OrderKind) -> Collection<OrderPaymentView> {
        self.db.collection(kind.collection_name())
    }

    pub async fn get_order_for_payment(
        &self,
        order_id: &str,
        kind: OrderKind,
    ) -> Result<OrderPaymentView> {
        self.collection(kind)
            .find_one(doc! { "order_id": order_id })
            .await?
            .ok_or_else(|| AppError::OrderNotFound(format!("{} ({})", order_id, kind)))
    }

    pub async fn set_order_payment_status(
        &self,
        order_id: &str,
        kind: OrderKind,
        update: OrderPaymentUpdate,
    ) -> Result<()> {
        let mut set: Document = doc! {
            "payment_status": update.status.as_str(),
            "updated_at": Utc::now().to_rfc3339(),
        };
        if let Some(receipt) = &update.receipt_number {
            set.insert("mpesa_receipt_number", receipt);
        }
        if let Some(checkout_id) = &update.checkout_request_id {
            set.insert("mpesa_checkout_request_id", checkout_id);
        }

        let result = self
            .collection(kind)
            .update_one(doc! { "order_id": order_id }, doc! { "$set": set })
            .await?;

        if result.matched_count == 0 {
            return Err(AppError::OrderNotFound(format!("{} ({})", order_id, kind)));
        }

        Ok(())
    }
}

/// Writes a terminal transaction's outcome back onto its order. A missing
/// order surfaces as `OrderNotFound` for the caller to log; the transaction's
/// own terminal state is already committed and stays untouched either way.
pub async fn reconcile(orders: &OrderStore, transaction: &PaymentTransaction) -> Result<()> {
    let status = match transaction.status {
        PaymentStatus::Completed => OrderPaymentStatus::Completed,
        PaymentStatus::Failed => OrderPaymentStatus::Failed,
        PaymentStatus::Pending => {
            return Err(AppError::validation(
                "Cannot reconcile a transaction that is still pending",
            ));
        }
    };

    orders
        .set_order_payment_status(
            &transaction.order_id,
            transaction.order_kind,
            OrderPaymentUpdate {
                status,
                receipt_number: transaction.receipt_number.clone(),
                checkout_request_id: Some(transaction.checkout_request_id.clone()),
            },
        )
        .await?;

    info!(
        "Order {} ({}) payment marked {}",
        transaction.order_id, transaction.order_kind, status
    );
    Ok(())
}
