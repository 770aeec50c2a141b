// models/order.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// Payment lifecycle of an order as seen by the surrounding system. Orders
/// start `unpaid`; this core moves them to `pending` on initiation and to a
/// terminal state during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Unpaid,
    Pending,
    Completed,
    Failed,
}

impl OrderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Unpaid => "unpaid",
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Completed => "completed",
            OrderPaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The minimal view of an order the payment core needs. Order documents carry
/// plenty of other fields (addresses, weights, pricing inputs); all of that is
/// ignored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaymentView {
    pub order_id: String,
    #[serde(default)]
    pub tracking_reference: Option<String>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub payment_status: Option<OrderPaymentStatus>,
}

/// Fields written back onto an order. Applying the same update twice is a
/// plain overwrite, which is what makes reconciliation safe to repeat.
#[derive(Debug, Clone)]
pub struct OrderPaymentUpdate {
    pub status: OrderPaymentStatus,
    pub receipt_number: Option<String>,
    pub checkout_request_id: Option<String>,
}
