//! Callback reconciliation: turns an asynchronous gateway result into an
//! atomic update of the payment record, the sale, and the ledger.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::mpesa_payment::{self, PaymentStatus};
use crate::entities::sale;
use crate::entities::transaction::{self, PAYMENT_METHOD_MPESA};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Gateway result code for a completed payment
const RESULT_CODE_SUCCESS: &str = "0";

const SALE_STATUS_COMPLETED: &str = "completed";
const SALE_PAYMENT_STATUS_COMPLETED: &str = "completed";

/// Wire envelope the gateway posts to the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    /// Observed on the wire as both a JSON number and a string
    #[serde(rename = "ResultCode", deserialize_with = "de_result_code", default)]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    /// Item list of Name/Value pairs (receipt number, amount, phone)
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<serde_json::Value>,
}

impl StkCallback {
    /// Looks up a named entry in the CallbackMetadata item list.
    pub fn metadata_value(&self, name: &str) -> Option<serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .get("Item")?
            .as_array()?
            .iter()
            .find(|item| item.get("Name").and_then(|n| n.as_str()) == Some(name))
            .and_then(|item| item.get("Value"))
            .cloned()
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

fn de_result_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }))
}

/// What the reconciler decided about a callback. Drives the HTTP reply and
/// is safe to return to the gateway verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No payment record matched either correlation identifier
    NotFound,
    /// The record was already in a terminal state; nothing changed
    AlreadyProcessed,
    /// Non-zero result code; payment marked failed, sale untouched
    Failed,
    /// Payment confirmed, ledger and sale updated
    Reconciled { sale_completed: bool },
}

pub struct ReconciliationService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Applies a gateway callback to the matching payment record.
    ///
    /// All writes happen in one transaction with the payment row locked, so
    /// concurrent deliveries of the same callback serialize and the second
    /// one hits the terminal-status guard. Terminal states never change
    /// again, in either direction.
    #[instrument(skip(self, envelope))]
    pub async fn process_callback(
        &self,
        envelope: &StkCallbackEnvelope,
    ) -> Result<CallbackOutcome, ServiceError> {
        let callback = &envelope.body.stk_callback;

        if callback.checkout_request_id.is_none() && callback.merchant_request_id.is_none() {
            warn!("Callback carried no correlation identifiers");
            counter!("stockflow_mpesa.callback", 1, "outcome" => "not_found");
            return Ok(CallbackOutcome::NotFound);
        }

        let mut lookup = Condition::any();
        if let Some(id) = callback.checkout_request_id.as_deref() {
            lookup = lookup.add(mpesa_payment::Column::CheckoutRequestId.eq(id));
        }
        if let Some(id) = callback.merchant_request_id.as_deref() {
            lookup = lookup.add(mpesa_payment::Column::MerchantRequestId.eq(id));
        }

        let txn = self.db.begin().await?;

        let payment = mpesa_payment::Entity::find()
            .filter(lookup)
            .lock_exclusive()
            .one(&txn)
            .await?;
        let payment = match payment {
            Some(p) => p,
            None => {
                warn!(
                    checkout_request_id = ?callback.checkout_request_id,
                    merchant_request_id = ?callback.merchant_request_id,
                    "Callback for unknown payment"
                );
                counter!("stockflow_mpesa.callback", 1, "outcome" => "not_found");
                return Ok(CallbackOutcome::NotFound);
            }
        };

        if payment.status.is_terminal() {
            info!(payment_id = %payment.id, status = payment.status.as_str(), "Callback replay ignored");
            counter!("stockflow_mpesa.callback", 1, "outcome" => "already_processed");
            return Ok(CallbackOutcome::AlreadyProcessed);
        }

        let result_code = callback
            .result_code
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let now = Utc::now();
        let raw_payload = serde_json::to_value(callback)
            .map_err(|e| ServiceError::InternalError(format!("callback serialization: {e}")))?;

        if result_code != RESULT_CODE_SUCCESS {
            let payment_id = payment.id;
            let mut active: mpesa_payment::ActiveModel = payment.into();
            active.status = Set(PaymentStatus::Failed);
            active.result_code = Set(Some(result_code.clone()));
            active.result_description = Set(callback.result_desc.clone());
            active.payload = Set(Some(raw_payload));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
            txn.commit().await?;

            info!(%payment_id, %result_code, "Payment failed per gateway callback");
            counter!("stockflow_mpesa.callback", 1, "outcome" => "failed");
            self.event_sender
                .send(Event::PaymentFailed {
                    payment_id,
                    result_code,
                })
                .await;
            return Ok(CallbackOutcome::Failed);
        }

        let payment_id = payment.id;
        let sale_id = payment.sale_id;
        let amount = payment.amount;
        let receipt = callback.receipt_number();

        let mut active: mpesa_payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Success);
        active.result_code = Set(Some(result_code));
        active.result_description = Set(callback.result_desc.clone());
        active.payload = Set(Some(raw_payload));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        let mut sale_completed = false;
        if let Some(sale_id) = sale_id {
            sale_completed = self
                .apply_to_sale(&txn, sale_id, amount, receipt.as_deref(), now)
                .await?;
        }

        txn.commit().await?;

        info!(%payment_id, ?sale_id, %amount, sale_completed, "Payment reconciled");
        counter!("stockflow_mpesa.callback", 1, "outcome" => "reconciled");

        self.event_sender
            .send(Event::PaymentCompleted {
                payment_id,
                sale_id,
                amount,
            })
            .await;
        if sale_completed {
            if let Some(sale_id) = sale_id {
                self.event_sender.send(Event::SaleCompleted { sale_id }).await;
            }
        }

        Ok(CallbackOutcome::Reconciled { sale_completed })
    }

    /// Posts the confirmed amount against the sale: one ledger row, one
    /// increment of `amount_received`, completion flip when fully paid.
    /// Returns whether the sale reached completion here.
    async fn apply_to_sale(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        sale_id: Uuid,
        amount: Decimal,
        receipt: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let sale_row = sale::Entity::find_by_id(sale_id)
            .lock_exclusive()
            .one(txn)
            .await?;
        let sale_row = match sale_row {
            Some(s) => s,
            None => {
                // The payment record survives; the sale was removed under us.
                warn!(%sale_id, "Reconciled payment references a missing sale");
                return Ok(false);
            }
        };

        // The guard skips only the ledger insert; the balance credit below
        // is unconditional so equal-amount payments still settle the sale.
        let existing_entry = transaction::Entity::find()
            .filter(
                Condition::all()
                    .add(transaction::Column::SaleId.eq(sale_id))
                    .add(transaction::Column::PaymentMethod.eq(PAYMENT_METHOD_MPESA))
                    .add(transaction::Column::Amount.eq(amount)),
            )
            .one(txn)
            .await?;
        if existing_entry.is_some() {
            info!(%sale_id, %amount, "Matching ledger entry already present, skipping insert");
        } else {
            transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                sale_id: Set(Some(sale_id)),
                store_id: Set(sale_row.store_id),
                contact_id: Set(sale_row.contact_id),
                transaction_date: Set(sale_row.sale_date),
                amount: Set(amount),
                payment_method: Set(PAYMENT_METHOD_MPESA.to_string()),
                transaction_type: Set(Some("sale".to_string())),
                note: Set(receipt.map(|r| format!("M-Pesa receipt {r}"))),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(txn)
            .await?;
        }

        let new_received = sale_row.amount_received + amount;
        let completed = new_received >= sale_row.total_amount;

        let mut active: sale::ActiveModel = sale_row.into();
        active.amount_received = Set(new_received);
        if completed {
            active.status = Set(SALE_STATUS_COMPLETED.to_string());
            active.payment_status = Set(SALE_PAYMENT_STATUS_COMPLETED.to_string());
        }
        active.updated_at = Set(Some(now));
        active.update(txn).await?;

        Ok(completed)
    }
}
