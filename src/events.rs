use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the payment core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Push request acknowledged by the gateway; pending record persisted
    PaymentInitiated {
        payment_id: Uuid,
        sale_id: Option<Uuid>,
        amount: Decimal,
    },
    /// Callback reconciled successfully; ledger and sale updated
    PaymentCompleted {
        payment_id: Uuid,
        sale_id: Option<Uuid>,
        amount: Decimal,
    },
    /// Gateway reported a non-zero result code for the push
    PaymentFailed {
        payment_id: Uuid,
        result_code: String,
    },
    /// Reconciliation brought the sale's received amount up to its total
    SaleCompleted { sale_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; a full or closed channel is logged, never fatal.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to publish domain event: {}", e);
        }
    }
}

/// Consumes domain events for the lifetime of the process.
///
/// The payment core only needs the audit log today; integrations subscribe
/// here when they appear.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match event {
            Event::PaymentInitiated {
                payment_id,
                sale_id,
                amount,
            } => {
                info!(%payment_id, ?sale_id, %amount, "Payment initiated");
            }
            Event::PaymentCompleted {
                payment_id,
                sale_id,
                amount,
            } => {
                info!(%payment_id, ?sale_id, %amount, "Payment completed");
            }
            Event::PaymentFailed {
                payment_id,
                result_code,
            } => {
                info!(%payment_id, %result_code, "Payment failed");
            }
            Event::SaleCompleted { sale_id } => {
                info!(%sale_id, "Sale fully paid");
            }
        }
    }
}
