//! Payment initiation and read-side queries for M-Pesa push payments.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::mpesa_payment::{self, PaymentStatus};
use crate::entities::sale;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::mpesa::MpesaClient;

/// Sale payment status while an STK push is outstanding
pub const SALE_PAYMENT_STATUS_PENDING_MPESA: &str = "pending_mpesa";

/// Result of a successfully submitted STK push.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitiatedPayment {
    /// Local payment record identifier
    pub payment_id: Uuid,
    pub sale_id: Option<Uuid>,
    /// Amount that will be charged, in whole currency units
    pub amount: Decimal,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    /// Gateway text suitable for showing at the till
    pub customer_message: Option<String>,
}

/// Read model for payment records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub sale_id: Option<Uuid>,
    pub phone: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

impl From<mpesa_payment::Model> for PaymentView {
    fn from(m: mpesa_payment::Model) -> Self {
        Self {
            id: m.id,
            sale_id: m.sale_id,
            phone: m.phone,
            amount: m.amount,
            status: m.status.as_str().to_string(),
            merchant_request_id: m.merchant_request_id,
            checkout_request_id: m.checkout_request_id,
            result_code: m.result_code,
            result_description: m.result_description,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Orchestrates push-payment initiation: gateway call first, then the
/// durable pending record. Nothing is persisted if the gateway declines.
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<MpesaClient>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, gateway: Arc<MpesaClient>, event_sender: EventSender) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Initiates an STK push for `amount` to `phone`, optionally tied to a
    /// sale. On gateway acknowledgment the pending payment row is written
    /// and the sale (if any) is marked as awaiting M-Pesa.
    #[instrument(skip(self), fields(%amount))]
    pub async fn initiate_payment(
        &self,
        sale_id: Option<Uuid>,
        phone: &str,
        amount: Decimal,
        reference: Option<&str>,
        description: Option<&str>,
    ) -> Result<InitiatedPayment, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }
        if phone.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Phone number is required".to_string(),
            ));
        }

        // Resolve the sale up front so a bad sale id never reaches the gateway.
        let sale_row = match sale_id {
            Some(id) => Some(
                sale::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", id)))?,
            ),
            None => None,
        };

        let reference = reference
            .map(str::to_string)
            .or_else(|| sale_row.as_ref().and_then(|s| s.invoice_number.clone()))
            .unwrap_or_else(|| "POS Payment".to_string());
        let description = description.unwrap_or("POS sale payment");

        let ack = self
            .gateway
            .initiate_stk_push(amount, phone, &reference, description)
            .await?;

        let charged = Decimal::from(crate::services::mpesa::round_to_unit(amount));
        let payment_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        mpesa_payment::ActiveModel {
            id: Set(payment_id),
            sale_id: Set(sale_id),
            phone: Set(Some(crate::services::mpesa::normalize_phone(phone))),
            amount: Set(charged),
            status: Set(PaymentStatus::Pending),
            merchant_request_id: Set(ack.merchant_request_id.clone()),
            checkout_request_id: Set(ack.checkout_request_id.clone()),
            result_code: Set(None),
            result_description: Set(None),
            payload: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        if let Some(sale_row) = sale_row {
            let mut active: sale::ActiveModel = sale_row.into();
            active.payment_status = Set(SALE_PAYMENT_STATUS_PENDING_MPESA.to_string());
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        counter!("stockflow_payments.initiated", 1);
        info!(
            %payment_id,
            ?sale_id,
            checkout_request_id = ?ack.checkout_request_id,
            "STK push accepted, pending payment recorded"
        );

        self.event_sender
            .send(Event::PaymentInitiated {
                payment_id,
                sale_id,
                amount: charged,
            })
            .await;

        Ok(InitiatedPayment {
            payment_id,
            sale_id,
            amount: charged,
            merchant_request_id: ack.merchant_request_id,
            checkout_request_id: ack.checkout_request_id,
            customer_message: ack.customer_message,
        })
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<PaymentView, ServiceError> {
        let payment = mpesa_payment::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;
        Ok(payment.into())
    }

    /// Lists payments newest first, optionally filtered by sale.
    pub async fn list_payments(
        &self,
        sale_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<PaymentView>, u64), ServiceError> {
        let mut query = mpesa_payment::Entity::find();
        if let Some(sale_id) = sale_id {
            query = query.filter(mpesa_payment::Column::SaleId.eq(sale_id));
        }

        let paginator = query
            .order_by_desc(mpesa_payment::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let payments = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(PaymentView::from)
            .collect();

        Ok((payments, total))
    }
}
