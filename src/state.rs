use std::sync::Arc;

use mongodb::Database;

use crate::services::gateway::PaymentGateway;
use crate::services::ledger::TransactionLedger;
use crate::services::notification::NotificationService;
use crate::services::reconciliation::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: Arc<dyn PaymentGateway>,
    pub ledger: TransactionLedger,
    pub orders: OrderStore,
    pub notifier: Option<Arc<NotificationService>>,
}

impl AppState {
    pub fn new(db: Database, gateway: Arc<dyn PaymentGateway>) -> Self {
        let ledger = TransactionLedger::new(&db);
        let orders = OrderStore::new(db.clone());

        AppState {
            db,
            gateway,
            ledger,
            orders,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}
