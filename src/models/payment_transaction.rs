// models/payment_transaction.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// The four kinds of order that can be paid for. Each kind maps to its own
/// collection; apart from that routing the payment flow treats them identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Regular,
    ColdChain,
    International,
    Special,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Regular => "regular",
            OrderKind::ColdChain => "cold_chain",
            OrderKind::International => "international",
            OrderKind::Special => "special",
        }
    }

    pub fn collection_name(&self) -> &'static str {
        match self {
            OrderKind::Regular => "parcels",
            OrderKind::ColdChain => "cold_chain_bookings",
            OrderKind::International => "international_shipments",
            OrderKind::Special => "special_deliveries",
        }
    }
}

impl FromStr for OrderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(OrderKind::Regular),
            "cold_chain" => Ok(OrderKind::ColdChain),
            "international" => Ok(OrderKind::International),
            "special" => Ok(OrderKind::Special),
            other => Err(AppError::validation(format!(
                "Unknown order type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STK push attempt. Rows are created as `pending`, move exactly once to
/// `completed` or `failed`, and are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<mongodb::bson::oid::ObjectId>,

    pub order_id: String,
    pub order_kind: OrderKind,
    pub phone_number: String,
    /// Whole shillings. The provider rejects fractional amounts, so rounding
    /// happens once at initiation and integers flow from there on.
    pub amount: i64,
    pub initiated_by: Option<String>,

    // M-Pesa correlation ids
    pub merchant_request_id: String,
    pub checkout_request_id: String,

    // Status tracking
    pub status: PaymentStatus,
    pub result_code: Option<i32>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Attributes of a freshly accepted push request, before the ledger stamps
/// identity and timestamps onto it.
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub order_id: String,
    pub order_kind: OrderKind,
    pub phone_number: String,
    pub amount: i64,
    pub initiated_by: Option<String>,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_kind_routing_table() {
        assert_eq!(OrderKind::Regular.collection_name(), "parcels");
        assert_eq!(OrderKind::ColdChain.collection_name(), "cold_chain_bookings");
        assert_eq!(OrderKind::International.collection_name(), "international_shipments");
        assert_eq!(OrderKind::Special.collection_name(), "special_deliveries");
    }

    #[test]
    fn order_kind_parses_wire_names() {
        for kind in [
            OrderKind::Regular,
            OrderKind::ColdChain,
            OrderKind::International,
            OrderKind::Special,
        ] {
            assert_eq!(kind.as_str().parse::<OrderKind>().unwrap(), kind);
        }
        assert!("overnight".parse::<OrderKind>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&OrderKind::ColdChain).unwrap(),
            "\"cold_chain\""
        );
    }
}
