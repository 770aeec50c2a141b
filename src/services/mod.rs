pub mod callback;
pub mod gateway;
pub mod ledger;
pub mod notification;
pub mod reconciliation;
