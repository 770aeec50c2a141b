// services/ledger.rs
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::Serialize;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::payment_transaction::{
    NewPaymentTransaction, OrderKind, PaymentStatus, PaymentTransaction,
};

/// Terminal outcome of a push payment. Constructors are the only way to build
/// one, so a `pending` outcome cannot be expressed.
#[derive(Debug, Clone)]
pub struct TerminalOutcome {
    status: PaymentStatus,
    result_code: i32,
    result_desc: String,
    receipt_number: Option<String>,
}

impl TerminalOutcome {
    pub fn completed(result_code: i32, result_desc: String, receipt_number: Option<String>) -> Self {
        TerminalOutcome {
            status: PaymentStatus::Completed,
            result_code,
            result_desc,
            receipt_number,
        }
    }

    pub fn failed(result_code: i32, result_desc: String) -> Self {
        TerminalOutcome {
            status: PaymentStatus::Failed,
            result_code,
            result_desc,
            receipt_number: None,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }
}

/// Result of a terminal transition. `transitioned` is false when the row was
/// already terminal, in which case the stored record comes back unchanged and
/// the caller must not re-run side effects.
#[derive(Debug)]
pub struct TransitionResult {
    pub transaction: PaymentTransaction,
    pub transitioned: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable record of every push-payment attempt. All state transitions funnel
/// through the conditional update in `transition_to_terminal`, which is what
/// serializes a racing callback and status poll.
#[derive(Clone)]
pub struct TransactionLedger {
    collection: Collection<PaymentTransaction>,
}

impl TransactionLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("payment_transactions"),
        }
    }

    /// Unique index backing the one-row-per-checkout-id invariant.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "checkout_request_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await?;
        Ok(())
    }

    pub async fn create(&self, new: NewPaymentTransaction) -> Result<PaymentTransaction> {
        // The id is provider-issued per request, so a hit here means something
        // upstream replayed a response. The unique index is the backstop.
        let existing = self
            .collection
            .find_one(doc! { "checkout_request_id": &new.checkout_request_id })
            .await?;
        if existing.is_some() {
            return Err(AppError::DuplicateCheckoutId(new.checkout_request_id));
        }

        let now = Utc::now();
        let transaction = PaymentTransaction {
            id: Some(ObjectId::new()),
            order_id: new.order_id,
            order_kind: new.order_kind,
            phone_number: new.phone_number,
            amount: new.amount,
            initiated_by: new.initiated_by,
            merchant_request_id: new.merchant_request_id,
            checkout_request_id: new.checkout_request_id,
            status: PaymentStatus::Pending,
            result_code: None,
            result_desc: None,
            receipt_number: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.collection.insert_one(&transaction).await?;
        info!(
            "Recorded pending transaction {} for order {}",
            transaction.checkout_request_id, transaction.order_id
        );
        Ok(transaction)
    }

    /// Moves a pending transaction to `completed` or `failed`. The filter only
    /// matches `pending` rows, so of two racing writers exactly one commits;
    /// the other gets the already-terminal record back with
    /// `transitioned = false`.
    pub async fn transition_to_terminal(
        &self,
        checkout_request_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<TransitionResult> {
        let updated = self
            .collection
            .find_one_and_update(
                transition_filter(checkout_request_id),
                transition_update(&outcome, Utc::now()),
            )
            .return_document(ReturnDocument::After)
            .await?;

        match updated {
            Some(transaction) => {
                info!(
                    "Transaction {} -> {} ({}: {})",
                    checkout_request_id, outcome.status, outcome.result_code, outcome.result_desc
                );
                Ok(TransitionResult {
                    transaction,
                    transitioned: true,
                })
            }
            None => {
                // Either already terminal (idempotent no-op) or unknown.
                let existing = self.get(checkout_request_id).await?;
                info!(
                    "Transaction {} already {}; transition ignored",
                    checkout_request_id, existing.status
                );
                Ok(TransitionResult {
                    transaction: existing,
                    transitioned: false,
                })
            }
        }
    }

    pub async fn get(&self, checkout_request_id: &str) -> Result<PaymentTransaction> {
        self.collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))
    }

    /// All attempts for one order, newest first.
    pub async fn history_for(
        &self,
        order_id: &str,
        order_kind: OrderKind,
    ) -> Result<Vec<PaymentTransaction>> {
        let filter = doc! {
            "order_id": order_id,
            "order_kind": order_kind.as_str(),
        };

        let cursor = self.collection.find(filter).await?;
        let mut transactions: Vec<PaymentTransaction> = cursor.try_collect().await?;

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(transactions)
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let total = self.collection.count_documents(doc! {}).await?;
        let pending = self
            .collection
            .count_documents(doc! { "status": PaymentStatus::Pending.as_str() })
            .await?;
        let completed = self
            .collection
            .count_documents(doc! { "status": PaymentStatus::Completed.as_str() })
            .await?;
        let failed = self
            .collection
            .count_documents(doc! { "status": PaymentStatus::Failed.as_str() })
            .await?;

        Ok(LedgerStats {
            total,
            pending,
            completed,
            failed,
        })
    }
}

/// Matches only the still-pending row, which is what makes the transition
/// first-writer-wins: whichever of a callback and a status poll commits first,
/// the other matches nothing and becomes a no-op.
fn transition_filter(checkout_request_id: &str) -> Document {
    doc! {
        "checkout_request_id": checkout_request_id,
        "status": PaymentStatus::Pending.as_str(),
    }
}

fn transition_update(outcome: &TerminalOutcome, now: chrono::DateTime<Utc>) -> Document {
    let mut set: Document = doc! {
        "status": outcome.status.as_str(),
        "result_code": outcome.result_code,
        "result_desc": &outcome.result_desc,
        "updated_at": now.to_rfc3339(),
    };
    if let Some(receipt) = &outcome.receipt_number {
        set.insert("receipt_number", receipt);
    }
    // completed_at is set exactly when the row leaves pending for completed.
    if outcome.status == PaymentStatus::Completed {
        set.insert("completed_at", now.to_rfc3339());
    }

    doc! { "$set": set }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_outcomes_cannot_be_pending() {
        let completed = TerminalOutcome::completed(0, "ok".into(), Some("ABC123".into()));
        assert_eq!(completed.status(), PaymentStatus::Completed);

        let failed = TerminalOutcome::failed(1, "Insufficient funds".into());
        assert_eq!(failed.status(), PaymentStatus::Failed);
        assert!(failed.receipt_number.is_none());
    }

    #[test]
    fn failed_outcome_never_carries_a_receipt() {
        let failed = TerminalOutcome::failed(1032, "Request cancelled by user".into());
        assert!(failed.receipt_number.is_none());
        assert_eq!(failed.result_code, 1032);
    }

    #[test]
    fn transition_only_matches_pending_rows() {
        let filter = transition_filter("ws_CO_191220191020363925");
        assert_eq!(
            filter.get_str("checkout_request_id").unwrap(),
            "ws_CO_191220191020363925"
        );
        // The status condition is the whole race guard: an already-terminal
        // row matches nothing and the second writer becomes a no-op.
        assert_eq!(filter.get_str("status").unwrap(), "pending");
    }

    #[test]
    fn completed_update_stamps_receipt_and_completion_time() {
        let outcome = TerminalOutcome::completed(0, "ok".into(), Some("ABC123".into()));
        let update = transition_update(&outcome, Utc::now());
        let set = update.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "completed");
        assert_eq!(set.get_str("receipt_number").unwrap(), "ABC123");
        assert_eq!(set.get_i32("result_code").unwrap(), 0);
        assert!(set.contains_key("completed_at"));
    }

    #[test]
    fn failed_update_never_sets_completed_at() {
        let outcome = TerminalOutcome::failed(1, "Insufficient funds".into());
        let update = transition_update(&outcome, Utc::now());
        let set = update.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "failed");
        assert_eq!(set.get_str("result_desc").unwrap(), "Insufficient funds");
        assert!(!set.contains_key("completed_at"));
        assert!(!set.contains_key("receipt_number"));
    }
}
