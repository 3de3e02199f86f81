pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::config::MpesaConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::mpesa::MpesaClient;
use crate::services::payments::PaymentService;
use crate::services::reconciliation::ReconciliationService;

/// Service instances shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, mpesa_config: MpesaConfig) -> Self {
        let gateway = Arc::new(MpesaClient::new(mpesa_config));
        Self {
            payments: Arc::new(PaymentService::new(
                db.clone(),
                gateway,
                event_sender.clone(),
            )),
            reconciliation: Arc::new(ReconciliationService::new(db, event_sender)),
        }
    }
}
